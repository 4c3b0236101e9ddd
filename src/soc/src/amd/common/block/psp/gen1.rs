/* SPDX-License-Identifier: GPL-2.0-only */

//! First generation mailbox, living in the PSP's memory-mapped BAR.

use super::{
    defs::{MboxCommand, PspStatus},
    PspConfig, PspMailbox,
};
use log::debug;
use oreboot_asm::io::RegisterIo;
use tock_registers::{register_bitfields, LocalRegisterCopy};
use util::timer::{poll_msecs, MonotonicTimer};

/// Offset of the mailbox inside the PSP BAR
pub const PSP_MAILBOX_BAR_OFFSET: usize = 0x70;

const PSPV1_CMD: usize = 0x00;
const PSPV1_STATUS: usize = 0x04;
const PSPV1_CMD_RESPONSE: usize = 0x08;

register_bitfields![u32,
    pub MBOX_STATUS [
        INITIALIZED OFFSET(0) NUMBITS(1) [],
        ERROR OFFSET(1) NUMBITS(1) [],
        TERMINATED OFFSET(2) NUMBITS(1) [],
        HALT OFFSET(3) NUMBITS(1) [],
        RECOVERY OFFSET(4) NUMBITS(1) []
    ]
];

type Status = LocalRegisterCopy<u32, MBOX_STATUS::Register>;

pub struct PspV1<R, T> {
    regs: R,
    timer: T,
    config: PspConfig,
}

impl<R: RegisterIo, T: MonotonicTimer> PspV1<R, T> {
    /// `regs` must address the mailbox itself, i.e. PSP BAR +
    /// [`PSP_MAILBOX_BAR_OFFSET`].
    pub fn new(regs: R, timer: T, config: PspConfig) -> Self {
        Self { regs, timer, config }
    }

    pub fn into_inner(self) -> R {
        self.regs
    }

    fn status(&self) -> Status {
        Status::new(self.regs.read32(PSPV1_STATUS))
    }

    fn wait_initialized(&self) -> Result<(), PspStatus> {
        poll_msecs(&self.timer, self.config.init_timeout_ms, || {
            self.status().is_set(MBOX_STATUS::INITIALIZED).then_some(())
        })
        .ok_or(PspStatus::InitTimeout)
    }

    /// The PSP clears the command register once it has consumed a command.
    fn wait_command(&self) -> Result<(), PspStatus> {
        poll_msecs(&self.timer, self.config.cmd_timeout_ms, || {
            (self.regs.read32(PSPV1_CMD) == 0).then_some(())
        })
        .ok_or(PspStatus::CmdTimeout)
    }
}

impl<R: RegisterIo, T: MonotonicTimer> PspMailbox for PspV1<R, T> {
    fn send_command(&mut self, command: MboxCommand, buffer: u64) -> Result<(), PspStatus> {
        let status = self.status();
        if status.is_set(MBOX_STATUS::RECOVERY) {
            return Err(PspStatus::Recovery);
        }
        /* check for PSP error conditions */
        if status.is_set(MBOX_STATUS::HALT) || status.is_set(MBOX_STATUS::TERMINATED) {
            return Err(PspStatus::Halted);
        }

        /* PSP must be finished with init and ready to accept a command */
        self.wait_initialized()?;
        self.wait_command()?;

        /* set address of command-response buffer and write command register */
        self.regs.write64(PSPV1_CMD_RESPONSE, buffer);
        self.regs.write32(PSPV1_CMD, command.code() as u32);
        debug!("PSPv1: sent {:?} with buffer {:#x}", command, buffer);

        self.wait_command()?;

        /* check delivery status */
        let status = self.status();
        if status.is_set(MBOX_STATUS::ERROR) || status.is_set(MBOX_STATUS::TERMINATED) {
            return Err(PspStatus::SendError);
        }

        Ok(())
    }
}
