/* SPDX-License-Identifier: GPL-2.0-only */

//! UFS host controller interface (UFSHCI) register block.

use bitfield::bitfield;

/* Host capabilities */
pub const REG_CONTROLLER_CAPABILITIES: usize = 0x00;
pub const REG_UFS_VERSION: usize = 0x08;
pub const REG_CONTROLLER_DEV_ID: usize = 0x10;
pub const REG_CONTROLLER_PROD_ID: usize = 0x14;

/* Operation and runtime */
pub const REG_INTERRUPT_STATUS: usize = 0x20;
pub const REG_INTERRUPT_ENABLE: usize = 0x24;
pub const REG_CONTROLLER_STATUS: usize = 0x30;
pub const REG_CONTROLLER_ENABLE: usize = 0x34;
pub const REG_UIC_ERROR_CODE_PHY_ADAPTER_LAYER: usize = 0x38;
pub const REG_UIC_ERROR_CODE_DATA_LINK_LAYER: usize = 0x3c;
pub const REG_UIC_ERROR_CODE_NETWORK_LAYER: usize = 0x40;
pub const REG_UIC_ERROR_CODE_TRANSPORT_LAYER: usize = 0x44;
pub const REG_UIC_ERROR_CODE_DME: usize = 0x48;

/* UTP transfer request list */
pub const REG_UTP_TRANSFER_REQ_LIST_BASE_L: usize = 0x50;
pub const REG_UTP_TRANSFER_REQ_LIST_BASE_H: usize = 0x54;
pub const REG_UTP_TRANSFER_REQ_DOOR_BELL: usize = 0x58;
pub const REG_UTP_TRANSFER_REQ_LIST_CLEAR: usize = 0x5c;
pub const REG_UTP_TRANSFER_REQ_LIST_RUN_STOP: usize = 0x60;

/* UTP task management request list */
pub const REG_UTP_TASK_REQ_LIST_BASE_L: usize = 0x70;
pub const REG_UTP_TASK_REQ_LIST_BASE_H: usize = 0x74;
pub const REG_UTP_TASK_REQ_DOOR_BELL: usize = 0x78;
pub const REG_UTP_TASK_REQ_LIST_CLEAR: usize = 0x7c;
pub const REG_UTP_TASK_REQ_LIST_RUN_STOP: usize = 0x80;

/* UIC command */
pub const REG_UIC_COMMAND: usize = 0x90;
pub const REG_UIC_COMMAND_ARG_1: usize = 0x94;
pub const REG_UIC_COMMAND_ARG_2: usize = 0x98;
pub const REG_UIC_COMMAND_ARG_3: usize = 0x9c;

/* Interrupt status / enable bits */
pub const UTP_TRANSFER_REQ_COMPL: u32 = 1 << 0;
pub const UIC_DME_END_PT_RESET: u32 = 1 << 1;
pub const UIC_ERROR: u32 = 1 << 2;
pub const UIC_TEST_MODE: u32 = 1 << 3;
pub const UIC_POWER_MODE: u32 = 1 << 4;
pub const UIC_HIBERNATE_EXIT: u32 = 1 << 5;
pub const UIC_HIBERNATE_ENTER: u32 = 1 << 6;
pub const UIC_LINK_LOST: u32 = 1 << 7;
pub const UIC_LINK_STARTUP: u32 = 1 << 8;
pub const UTP_TASK_REQ_COMPL: u32 = 1 << 9;
pub const UIC_COMMAND_COMPL: u32 = 1 << 10;
pub const DEVICE_FATAL_ERROR: u32 = 1 << 11;
pub const CONTROLLER_FATAL_ERROR: u32 = 1 << 16;
pub const SYSTEM_BUS_FATAL_ERROR: u32 = 1 << 17;

pub const UFSHCD_UIC_PWR_MASK: u32 = UIC_HIBERNATE_ENTER | UIC_HIBERNATE_EXIT | UIC_POWER_MODE;
pub const UFSHCD_ERROR_MASK: u32 =
    UIC_ERROR | DEVICE_FATAL_ERROR | CONTROLLER_FATAL_ERROR | SYSTEM_BUS_FATAL_ERROR;
pub const UFSHCD_ENABLE_INTRS: u32 = UTP_TRANSFER_REQ_COMPL | UFSHCD_ERROR_MASK;

/* Host controller enable */
pub const CONTROLLER_ENABLE: u32 = 1 << 0;

/* Run-stop bits of both request lists */
pub const UTP_RUN_STOP: u32 = 1 << 0;

/* UPMCRS values in the controller status register */
pub const PWR_OK: u8 = 0x0;
pub const PWR_LOCAL: u8 = 0x1;
pub const PWR_REMOTE: u8 = 0x2;
pub const PWR_BUSY: u8 = 0x3;
pub const PWR_ERROR_CAP: u8 = 0x4;
pub const PWR_FATAL_ERROR: u8 = 0x5;

/* Result code in UIC command argument 2 */
pub const UIC_CMD_RESULT_MASK: u32 = 0xff;
pub const UIC_CMD_RESULT_SUCCESS: u8 = 0x00;

bitfield! {
    /// Host controller capabilities (CAP)
    #[derive(Clone, Copy)]
    pub struct Capabilities(u32);
    impl Debug;
    /// Number of transfer request slots, minus one
    pub u8, nutrs_m1, _: 4, 0;
    pub u8, rttr, _: 15, 8;
    /// Number of task management request slots, minus one
    pub u8, nutmrs_m1, _: 18, 16;
    pub auto_hibernate, _: 23;
    pub addr64, _: 24;
    pub out_of_order, _: 25;
    pub uic_dme_test_mode, _: 26;
}

impl Capabilities {
    pub fn nutrs(&self) -> u8 {
        self.nutrs_m1() + 1
    }

    pub fn nutmrs(&self) -> u8 {
        self.nutmrs_m1() + 1
    }
}

bitfield! {
    /// Host controller status (HCS)
    #[derive(Clone, Copy)]
    pub struct ControllerStatus(u32);
    impl Debug;
    pub device_present, _: 0;
    pub utrl_ready, _: 1;
    pub utmrl_ready, _: 2;
    pub uic_cmd_ready, _: 3;
    pub u8, upmcrs, _: 10, 8;
}

impl ControllerStatus {
    pub fn lists_ready(&self) -> bool {
        self.utrl_ready() && self.utmrl_ready()
    }
}

bitfield! {
    /// UFSHCI version register, BCD encoded
    #[derive(Clone, Copy)]
    pub struct Version(u32);
    impl Debug;
    pub u8, suffix, _: 3, 0;
    pub u8, minor, _: 7, 4;
    pub u8, major, _: 15, 8;
}

macro_rules! impl_from_raw {
    ($($reg:ident),*) => {
        $(
            impl From<u32> for $reg {
                fn from(raw: u32) -> Self {
                    Self(raw)
                }
            }
        )*
    };
}

impl_from_raw!(Capabilities, ControllerStatus, Version);
