/* SPDX-License-Identifier: GPL-2.0-only */

//! Client side of the x86-to-PSP mailbox.
//!
//! Every command follows the same handshake: wait for the PSP to be idle,
//! publish the physical address of a command-response buffer, write the
//! command code, then poll until the PSP clears it again. The transport
//! differs between PSP generations and is abstracted by [`PspMailbox`].

pub mod defs;
pub mod gen1;
pub mod gen2;

use bootstate::{BootState, BootStateFn, BootStateRegistry, BootStateSequence};
use core::sync::atomic::{fence, Ordering};
use log::{debug, error, info, warn};
use util::cb_err::CbErr;

use self::defs::*;

/// Timeouts used while talking to the PSP
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PspConfig {
    pub cmd_timeout_ms: u64,
    pub init_timeout_ms: u64,
}

impl Default for PspConfig {
    fn default() -> Self {
        Self {
            cmd_timeout_ms: PSP_CMD_TIMEOUT_MS,
            init_timeout_ms: PSP_INIT_TIMEOUT_MS,
        }
    }
}

/// One generation of the mailbox handshake.
pub trait PspMailbox {
    /// Sends `command` with the command-response buffer at physical address
    /// `buffer` and waits for the PSP to consume it.
    fn send_command(&mut self, command: MboxCommand, buffer: u64) -> Result<(), PspStatus>;
}

impl<M: PspMailbox + ?Sized> PspMailbox for &mut M {
    fn send_command(&mut self, command: MboxCommand, buffer: u64) -> Result<(), PspStatus> {
        (**self).send_command(command, buffer)
    }
}

/// Firmware images the PSP loads on the host's behalf
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Blob {
    SmuFw,
    SmuFw2,
}

impl Blob {
    const fn command(self) -> MboxCommand {
        match self {
            Self::SmuFw => MboxCommand::SmuFw,
            Self::SmuFw2 => MboxCommand::SmuFw2,
        }
    }
}

/// Lookup of named files in the boot media, CBFS in a full build.
pub trait BlobSource {
    fn map(&self, name: &str) -> Option<&[u8]>;
}

/// Buffers are shared with the PSP by address; firmware runs identity-mapped.
fn phys_addr<B: ?Sized>(buffer: *const B) -> u64 {
    buffer as *const u8 as usize as u64
}

fn print_cmd_status(result: Result<(), PspStatus>, buffer_status: Option<u32>) {
    if let Some(status) = buffer_status.filter(|&s| s != 0) {
        debug!("PSP: buffer status={:#x}", status);
    }
    match result {
        Ok(()) => debug!("PSP: OK"),
        Err(e) => warn!("PSP: {}", e),
    }
}

pub struct Psp<M> {
    mbox: M,
}

impl<M: PspMailbox> Psp<M> {
    pub fn new(mbox: M) -> Self {
        Self { mbox }
    }

    pub fn mailbox(&mut self) -> &mut M {
        &mut self.mbox
    }

    pub fn into_inner(self) -> M {
        self.mbox
    }

    /// Sends a command with a typed buffer and reports the outcome.
    pub fn send<B: MboxBuffer>(&mut self, command: MboxCommand, buffer: &mut B) -> Result<(), PspStatus> {
        /* The PSP reads the buffer from memory */
        fence(Ordering::SeqCst);
        let result = self.mbox.send_command(command, phys_addr(buffer as *mut B));
        fence(Ordering::SeqCst);
        print_cmd_status(result, Some(buffer.response_status()));
        result
    }

    pub fn notify_dram(&mut self) -> Result<(), PspStatus> {
        debug!("PSP: Notify that DRAM is available...");
        let mut buffer = MboxDefaultBuffer::new();
        self.send(MboxCommand::DramInfo, &mut buffer)
    }

    pub fn notify_boot_done(&mut self) -> Result<(), PspStatus> {
        debug!("PSP: Notify that POST is finishing...");
        let mut buffer = MboxDefaultBuffer::new();
        self.send(MboxCommand::BootDone, &mut buffer)
    }

    /// Tells the PSP which sleep state the system is about to enter.
    ///
    /// Meant to be called from SMM on the sleep path.
    pub fn notify_sx_info(&mut self, sleep_type: u8) -> Result<(), PspStatus> {
        debug!("PSP: Prepare to enter sleep state {}...", sleep_type);
        let mut buffer = MboxSxInfoBuffer::new(sleep_type);
        self.send(MboxCommand::SxInfo, &mut buffer)
    }

    pub fn notify_smm(&mut self, info: SmmInfo) -> Result<(), PspStatus> {
        debug!("PSP: Notify SMM info...");
        let mut buffer = MboxSmmInfoBuffer::new(info);
        self.send(MboxCommand::SmmInfo, &mut buffer)
    }

    /// Queries the PSP security state bits (HSTI).
    pub fn get_hsti_state(&mut self) -> Result<u32, PspStatus> {
        debug!("PSP: Querying PSP security state...");
        let mut buffer = MboxHstiQueryBuffer::new();
        self.send(MboxCommand::HstiQuery, &mut buffer)?;
        Ok(buffer.state())
    }

    /// Has the PSP load a firmware blob for another on-die controller.
    ///
    /// The blob itself serves as the command-response buffer.
    pub fn load_named_blob<S: BlobSource + ?Sized>(
        &mut self,
        blob: Blob,
        name: &str,
        source: &S,
    ) -> Result<(), PspStatus> {
        let Some(data) = source.map(name) else {
            error!("BUG: Cannot map blob for PSP loading");
            return Err(PspStatus::InvalidName);
        };
        if data.is_empty() {
            error!("PSP: {} is empty", name);
            return Err(PspStatus::InvalidBlob);
        }

        info!("PSP: Load blob type {:?} from @{:#x}...", blob, phys_addr(data.as_ptr()));
        fence(Ordering::SeqCst);
        let result = self.mbox.send_command(blob.command(), phys_addr(data.as_ptr()));
        print_cmd_status(result, None);
        result
    }

    /// Asks the PSP to fuse the security patch level if the PSP requested it
    /// through core-to-PSP message 38.
    ///
    /// Returns `Ok(false)` when no fusing was requested or the request was
    /// inconsistent, in which case no command is sent.
    pub fn set_spl_fuse(&mut self, c2p38: u32) -> Result<bool, PspStatus> {
        if c2p38 & C2P38_FUSE_SPL == 0 {
            return Ok(false);
        }
        info!("PSP: Fuse SPL requested");

        if c2p38 & C2P38_SPL_FUSE_ERROR != 0 {
            error!("PSP: SPL Table does not meet fuse requirements");
            return Ok(false);
        }
        if c2p38 & C2P38_SPL_ENTRY_ERROR != 0 {
            error!("PSP: Critical SPL entry missing or current firmware does not meet requirements");
            return Ok(false);
        }
        if c2p38 & C2P38_SPL_ENTRY_MISSING != 0 {
            error!("PSP: Table of critical SPL values is missing");
            return Ok(false);
        }

        debug!("PSP: Fuse SPL...");
        let mut buffer = MboxSplBuffer::new();
        self.send(MboxCommand::SetSplFuse, &mut buffer)?;
        Ok(true)
    }

    pub fn psb_auto_fuse(&mut self) -> Result<(), PspStatus> {
        debug!("PSB: Enable PSB auto-fusing...");
        let mut buffer = MboxDefaultBuffer::new();
        self.send(MboxCommand::PsbAutoFusing, &mut buffer).map_err(|e| {
            error!("PSB: Fusing request failed: {}", e.code());
            e
        })
    }

    /// Boot state callback body: tell the PSP POST is done.
    pub fn boot_done_callback(&mut self) -> Result<(), CbErr> {
        self.notify_boot_done().map_err(|e| {
            error!("PSP: boot done notification failed: {}", e);
            CbErr::from(device::Error::kind(&e))
        })
    }
}

/// Registers `hook` (normally wrapping [`Psp::boot_done_callback`]) at the
/// point coreboot notifies the PSP: on entry to payload boot.
pub fn register_boot_done<'a, const N: usize>(
    registry: &mut BootStateRegistry<'a, N>,
    hook: BootStateFn<'a>,
) -> Result<(), CbErr> {
    registry.register(
        "psp_notify_boot_done",
        BootState::PayloadBoot,
        BootStateSequence::OnEntry,
        hook,
    )
}
