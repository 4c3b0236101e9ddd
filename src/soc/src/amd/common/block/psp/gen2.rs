/* SPDX-License-Identifier: GPL-2.0-only */

//! Second generation mailbox, reached through the PSP's public SMN window.

use super::{
    defs::{MboxCommand, PspStatus},
    PspConfig, PspMailbox,
};
use crate::amd::common::block::smn::{Smn, SMN_PSP_PUBLIC_BASE};
use log::debug;
use oreboot_asm::io::RegisterIo;
use tock_registers::{register_bitfields, LocalRegisterCopy};
use util::timer::{poll_msecs, MonotonicTimer};

pub const PSP_MAILBOX_COMMAND_OFFSET: usize = 0x10570;
pub const PSP_MAILBOX_BUFFER_L_OFFSET: usize = 0x10574;
pub const PSP_MAILBOX_BUFFER_H_OFFSET: usize = 0x10578;
pub const CORE_2_PSP_MSG_38_OFFSET: usize = 0x10998;

register_bitfields![u32,
    pub MBOX_COMMAND [
        /// Delivery status, non-zero when the PSP rejected the command
        STATUS OFFSET(0) NUMBITS(16) [],
        COMMAND OFFSET(16) NUMBITS(8) [],
        RECOVERY OFFSET(30) NUMBITS(1) [],
        READY OFFSET(31) NUMBITS(1) []
    ]
];

type Command = LocalRegisterCopy<u32, MBOX_COMMAND::Register>;

pub struct PspV2<R, T> {
    regs: R,
    timer: T,
    config: PspConfig,
}

impl<R: RegisterIo, T: MonotonicTimer> PspV2<R, T> {
    /// `regs` addresses the PSP public register space, either through SMN
    /// or a mapped window of it.
    pub fn new(regs: R, timer: T, config: PspConfig) -> Self {
        Self { regs, timer, config }
    }

    pub fn into_inner(self) -> R {
        self.regs
    }

    fn command(&self) -> Command {
        Command::new(self.regs.read32(PSP_MAILBOX_COMMAND_OFFSET))
    }

    /// Core-to-PSP message 38, which carries the SPL fuse request bits
    pub fn c2p38(&self) -> u32 {
        self.regs.read32(CORE_2_PSP_MSG_38_OFFSET)
    }

    fn wait_command(&self, wait_for_ready: bool) -> Result<(), PspStatus> {
        poll_msecs(&self.timer, self.config.cmd_timeout_ms, || {
            let cmd = self.command();
            let idle = cmd.read(MBOX_COMMAND::COMMAND) == 0;
            let ready = !wait_for_ready || cmd.is_set(MBOX_COMMAND::READY);
            (idle && ready).then_some(())
        })
        .ok_or(PspStatus::CmdTimeout)
    }

    fn write_buffer_ptr(&mut self, buffer: u64) {
        self.regs.write32(PSP_MAILBOX_BUFFER_L_OFFSET, buffer as u32);
        self.regs.write32(PSP_MAILBOX_BUFFER_H_OFFSET, (buffer >> 32) as u32);
    }

    fn write_command(&mut self, command: MboxCommand) {
        let mut cmd = Command::new(0);
        cmd.modify(MBOX_COMMAND::COMMAND.val(command.code() as u32));
        /* Write entire 32-bit area to begin command execution */
        self.regs.write32(PSP_MAILBOX_COMMAND_OFFSET, cmd.get());
    }
}

impl<P: RegisterIo, T: MonotonicTimer> PspV2<Smn<P>, T> {
    /// Mailbox reached through the SMN index/data pair of the root complex.
    pub fn over_smn(pci: P, timer: T) -> Self {
        Self::new(Smn::new(pci, SMN_PSP_PUBLIC_BASE), timer, PspConfig::default())
    }
}

impl<R: RegisterIo, T: MonotonicTimer> PspMailbox for PspV2<R, T> {
    fn send_command(&mut self, command: MboxCommand, buffer: u64) -> Result<(), PspStatus> {
        if self.command().is_set(MBOX_COMMAND::RECOVERY) {
            return Err(PspStatus::Recovery);
        }

        self.wait_command(true)?;

        self.write_buffer_ptr(buffer);
        self.write_command(command);
        debug!("PSPv2: sent {:?} with buffer {:#x}", command, buffer);

        /* PSP clears command register when complete. All commands except
         * SxInfo set the Ready bit. */
        self.wait_command(command != MboxCommand::SxInfo)?;

        /* check delivery status */
        let status = self.command().read(MBOX_COMMAND::STATUS);
        if status != 0 {
            debug!("PSPv2: delivery status {:#x}", status);
            return Err(PspStatus::SendError);
        }

        Ok(())
    }
}
