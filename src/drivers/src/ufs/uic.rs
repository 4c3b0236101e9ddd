/* SPDX-License-Identifier: GPL-2.0-only */

//! UIC (UniPro interconnect) commands: link startup, DME attribute access,
//! power mode changes and hibernation.

use super::{
    host::UfsHost,
    regs::*,
    variant::{NotifyStage, UfsVariantOps},
    Error, Stage,
};
use log::{debug, error, info, warn};
use oreboot_asm::io::RegisterIo;
use util::timer::{poll_msecs, MonotonicTimer};

/* PHY adapter layer attributes */
pub const PA_AVAILTXDATALANES: u16 = 0x1520;
pub const PA_AVAILRXDATALANES: u16 = 0x1540;
pub const PA_ACTIVETXDATALANES: u16 = 0x1560;
pub const PA_CONNECTEDTXDATALANES: u16 = 0x1561;
pub const PA_TXGEAR: u16 = 0x1568;
pub const PA_TXTERMINATION: u16 = 0x1569;
pub const PA_HSSERIES: u16 = 0x156a;
pub const PA_PWRMODE: u16 = 0x1571;
pub const PA_ACTIVERXDATALANES: u16 = 0x1580;
pub const PA_CONNECTEDRXDATALANES: u16 = 0x1581;
pub const PA_RXGEAR: u16 = 0x1583;
pub const PA_RXTERMINATION: u16 = 0x1584;
pub const PA_MAXRXPWMGEAR: u16 = 0x1586;
pub const PA_MAXRXHSGEAR: u16 = 0x1587;

/* DME attribute set types */
pub const ATTR_SET_NOR: u8 = 0;
pub const ATTR_SET_ST: u8 = 1;

/// Peer attribute accesses cross the link and may need another try.
const UFS_UIC_COMMAND_RETRIES: u32 = 3;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UicCmd {
    DmeGet = 0x01,
    DmeSet = 0x02,
    DmePeerGet = 0x03,
    DmePeerSet = 0x04,
    DmePowerOn = 0x10,
    DmePowerOff = 0x11,
    DmeEnable = 0x12,
    DmeReset = 0x14,
    DmeEndPointReset = 0x15,
    DmeLinkStartup = 0x16,
    DmeHibernateEnter = 0x17,
    DmeHibernateExit = 0x18,
    DmeTestMode = 0x1a,
}

/// A UIC command and its three argument registers. On completion `arg2`
/// holds the result code and `arg3` the value read by a GET.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UicCommand {
    pub cmd: UicCmd,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
}

impl UicCommand {
    pub const fn new(cmd: UicCmd) -> Self {
        Self {
            cmd,
            arg1: 0,
            arg2: 0,
            arg3: 0,
        }
    }

    /// A DME access to `attr`/`selector`.
    pub const fn dme(cmd: UicCmd, attr: u16, selector: u16, set_type: u8, value: u32) -> Self {
        Self {
            cmd,
            arg1: uic_arg_mib_sel(attr, selector),
            arg2: (set_type as u32) << 16,
            arg3: value,
        }
    }

    pub const fn result(&self) -> u8 {
        (self.arg2 & UIC_CMD_RESULT_MASK) as u8
    }
}

pub const fn uic_arg_mib_sel(attr: u16, selector: u16) -> u32 {
    (attr as u32) << 16 | selector as u32
}

/// PA_PWRMODE values for one direction
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PwrMode {
    Fast = 1,
    Slow = 2,
    FastAuto = 4,
    SlowAuto = 5,
}

impl PwrMode {
    pub const fn is_fast(self) -> bool {
        matches!(self, Self::Fast | Self::FastAuto)
    }
}

/// High-speed rate series
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HsRate {
    A = 1,
    B = 2,
}

/// Requested (or resulting) link configuration
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PowerMode {
    pub gear_rx: u32,
    pub gear_tx: u32,
    pub lane_rx: u32,
    pub lane_tx: u32,
    pub pwr_rx: PwrMode,
    pub pwr_tx: PwrMode,
    pub hs_rate: HsRate,
}

impl PowerMode {
    /// HS-G`gear` rate B on as many lanes as the link has.
    pub const fn fast(gear: u32) -> Self {
        Self {
            gear_rx: gear,
            gear_tx: gear,
            lane_rx: u32::MAX,
            lane_tx: u32::MAX,
            pwr_rx: PwrMode::Fast,
            pwr_tx: PwrMode::Fast,
            hs_rate: HsRate::B,
        }
    }

    fn is_fast(&self) -> bool {
        self.pwr_rx.is_fast() || self.pwr_tx.is_fast()
    }

    /// Value of PA_PWRMODE, RX mode in the high nibble
    pub const fn pa_pwrmode(&self) -> u32 {
        (self.pwr_rx as u32) << 4 | self.pwr_tx as u32
    }
}

impl<'d, R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> UfsHost<'d, R, T, V> {
    /// Runs a UIC command and waits for its completion.
    pub fn send_uic_cmd(&mut self, cmd: &mut UicCommand) -> Result<(), Error> {
        let timeout = self.config.uic_cmd_timeout_ms;
        if poll_msecs(&self.timer, timeout, || self.status().uic_cmd_ready().then_some(())).is_none() {
            error!("UFS: controller not ready to accept UIC commands");
            return Err(Error::Timeout(Stage::UicReady));
        }

        self.regs.write32(REG_INTERRUPT_STATUS, UIC_COMMAND_COMPL);
        self.regs.write32(REG_UIC_COMMAND_ARG_1, cmd.arg1);
        self.regs.write32(REG_UIC_COMMAND_ARG_2, cmd.arg2);
        self.regs.write32(REG_UIC_COMMAND_ARG_3, cmd.arg3);
        self.regs.write32(REG_UIC_COMMAND, cmd.cmd as u32);

        let done = poll_msecs(&self.timer, timeout, || {
            (self.regs.read32(REG_INTERRUPT_STATUS) & UIC_COMMAND_COMPL != 0).then_some(())
        });
        if done.is_none() {
            error!("UFS: UIC command {:?} timed out", cmd.cmd);
            return Err(Error::Timeout(Stage::UicCommand));
        }
        self.regs.write32(REG_INTERRUPT_STATUS, UIC_COMMAND_COMPL);

        cmd.arg2 = self.regs.read32(REG_UIC_COMMAND_ARG_2);
        cmd.arg3 = self.regs.read32(REG_UIC_COMMAND_ARG_3);
        match cmd.result() {
            UIC_CMD_RESULT_SUCCESS => Ok(()),
            result => {
                debug!("UFS: UIC command {:?} result {:#x}", cmd.cmd, result);
                Err(Error::UicResult {
                    cmd: cmd.cmd as u8,
                    result,
                })
            }
        }
    }

    fn dme_get_attr(&mut self, attr: u16, selector: u16, peer: bool) -> Result<u32, Error> {
        let (op, tries) = if peer {
            (UicCmd::DmePeerGet, UFS_UIC_COMMAND_RETRIES)
        } else {
            (UicCmd::DmeGet, 1)
        };
        let mut result = Err(Error::InvalidArgument);
        for _ in 0..tries {
            let mut cmd = UicCommand::dme(op, attr, selector, ATTR_SET_NOR, 0);
            result = self.send_uic_cmd(&mut cmd).map(|()| cmd.arg3);
            if result.is_ok() {
                break;
            }
        }
        if let Err(e) = result {
            warn!("UFS: {:?} of attribute {:#x} failed: {}", op, attr, e);
        }
        result
    }

    fn dme_set_attr(&mut self, attr: u16, selector: u16, set_type: u8, value: u32, peer: bool) -> Result<(), Error> {
        let (op, tries) = if peer {
            (UicCmd::DmePeerSet, UFS_UIC_COMMAND_RETRIES)
        } else {
            (UicCmd::DmeSet, 1)
        };
        let mut result = Err(Error::InvalidArgument);
        for _ in 0..tries {
            let mut cmd = UicCommand::dme(op, attr, selector, set_type, value);
            result = self.send_uic_cmd(&mut cmd);
            if result.is_ok() {
                break;
            }
        }
        if let Err(e) = result {
            warn!("UFS: {:?} of attribute {:#x} to {:#x} failed: {}", op, attr, value, e);
        }
        result
    }

    pub fn dme_get(&mut self, attr: u16, selector: u16) -> Result<u32, Error> {
        self.dme_get_attr(attr, selector, false)
    }

    pub fn dme_set(&mut self, attr: u16, selector: u16, value: u32) -> Result<(), Error> {
        self.dme_set_attr(attr, selector, ATTR_SET_NOR, value, false)
    }

    pub fn dme_peer_get(&mut self, attr: u16, selector: u16) -> Result<u32, Error> {
        self.dme_get_attr(attr, selector, true)
    }

    pub fn dme_peer_set(&mut self, attr: u16, selector: u16, value: u32) -> Result<(), Error> {
        self.dme_set_attr(attr, selector, ATTR_SET_NOR, value, true)
    }

    /// Brings the UniPro link up and checks a device answered on it.
    pub fn link_startup(&mut self) -> Result<(), Error> {
        let mut result = Err(Error::NoDevice);
        for attempt in 1..=self.config.link_startup_retries {
            self.variant.link_startup_notify(&mut self.regs, NotifyStage::Pre)?;
            let mut cmd = UicCommand::new(UicCmd::DmeLinkStartup);
            result = self.send_uic_cmd(&mut cmd);
            match result {
                Ok(()) => break,
                Err(e) => warn!("UFS: link startup attempt {} failed: {}", attempt, e),
            }
        }
        if let Err(e) = result {
            error!("UFS: link startup failed: {}", e);
            return Err(e);
        }

        if !self.status().device_present() {
            error!("UFS: no device detected after link startup");
            return Err(Error::NoDevice);
        }

        /* Error code registers clear on read; drop anything the link
         * training left behind. */
        for reg in [
            REG_UIC_ERROR_CODE_PHY_ADAPTER_LAYER,
            REG_UIC_ERROR_CODE_DATA_LINK_LAYER,
            REG_UIC_ERROR_CODE_NETWORK_LAYER,
            REG_UIC_ERROR_CODE_TRANSPORT_LAYER,
            REG_UIC_ERROR_CODE_DME,
        ] {
            let _ = self.regs.read32(reg);
        }

        self.variant.link_startup_notify(&mut self.regs, NotifyStage::Post)?;
        info!("UFS: link up");
        Ok(())
    }

    /// Issues a power control UIC command and waits for the controller to
    /// report the matching power mode interrupt.
    fn uic_pwr_ctrl(&mut self, mut cmd: UicCommand, done_bit: u32, stage: Stage) -> Result<(), Error> {
        self.regs.write32(REG_INTERRUPT_STATUS, done_bit);
        self.send_uic_cmd(&mut cmd)?;

        let done = poll_msecs(&self.timer, self.config.uic_cmd_timeout_ms, || {
            (self.regs.read32(REG_INTERRUPT_STATUS) & done_bit != 0).then_some(())
        });
        if done.is_none() {
            error!("UFS: {:?} did not complete", cmd.cmd);
            return Err(Error::Timeout(stage));
        }
        self.regs.write32(REG_INTERRUPT_STATUS, done_bit);

        match self.status().upmcrs() {
            PWR_LOCAL => Ok(()),
            status => {
                error!("UFS: power mode change failed, UPMCRS {:#x}", status);
                Err(Error::PowerModeStatus(status))
            }
        }
    }

    pub fn hibernate_enter(&mut self) -> Result<(), Error> {
        self.uic_pwr_ctrl(
            UicCommand::new(UicCmd::DmeHibernateEnter),
            UIC_HIBERNATE_ENTER,
            Stage::Hibernate,
        )
    }

    pub fn hibernate_exit(&mut self) -> Result<(), Error> {
        self.uic_pwr_ctrl(
            UicCommand::new(UicCmd::DmeHibernateExit),
            UIC_HIBERNATE_EXIT,
            Stage::Hibernate,
        )
    }

    /// Switches the link to `desired`, clamped to what both ends support.
    /// Returns the mode actually configured.
    pub fn change_power_mode(&mut self, desired: PowerMode) -> Result<PowerMode, Error> {
        let lanes_rx = self.dme_get(PA_CONNECTEDRXDATALANES, 0)?;
        let lanes_tx = self.dme_get(PA_CONNECTEDTXDATALANES, 0)?;
        if lanes_rx == 0 || lanes_tx == 0 {
            error!("UFS: invalid connected lanes rx={} tx={}", lanes_rx, lanes_tx);
            return Err(Error::NoDevice);
        }

        let (max_rx, max_tx) = if desired.is_fast() {
            (self.dme_get(PA_MAXRXHSGEAR, 0)?, self.dme_peer_get(PA_MAXRXHSGEAR, 0)?)
        } else {
            (self.dme_get(PA_MAXRXPWMGEAR, 0)?, self.dme_peer_get(PA_MAXRXPWMGEAR, 0)?)
        };

        let mut mode = PowerMode {
            lane_rx: desired.lane_rx.min(lanes_rx),
            lane_tx: desired.lane_tx.min(lanes_tx),
            gear_rx: desired.gear_rx.min(max_rx),
            gear_tx: desired.gear_tx.min(max_tx),
            ..desired
        };

        self.variant
            .pwr_change_notify(&mut self.regs, NotifyStage::Pre, &mut mode)?;

        self.dme_set(PA_RXGEAR, 0, mode.gear_rx)?;
        self.dme_set(PA_ACTIVERXDATALANES, 0, mode.lane_rx)?;
        self.dme_set(PA_RXTERMINATION, 0, mode.pwr_rx.is_fast() as u32)?;
        self.dme_set(PA_TXGEAR, 0, mode.gear_tx)?;
        self.dme_set(PA_ACTIVETXDATALANES, 0, mode.lane_tx)?;
        self.dme_set(PA_TXTERMINATION, 0, mode.pwr_tx.is_fast() as u32)?;
        if mode.is_fast() {
            self.dme_set(PA_HSSERIES, 0, mode.hs_rate as u32)?;
        }

        let cmd = UicCommand::dme(UicCmd::DmeSet, PA_PWRMODE, 0, ATTR_SET_NOR, mode.pa_pwrmode());
        self.uic_pwr_ctrl(cmd, UIC_POWER_MODE, Stage::PowerModeChange)?;

        self.variant
            .pwr_change_notify(&mut self.regs, NotifyStage::Post, &mut mode)?;
        info!(
            "UFS: power mode {:?}/{:?} gear {}/{} lanes {}/{} rate {:?}",
            mode.pwr_rx, mode.pwr_tx, mode.gear_rx, mode.gear_tx, mode.lane_rx, mode.lane_tx, mode.hs_rate
        );
        Ok(mode)
    }
}
