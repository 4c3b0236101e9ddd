/* SPDX-License-Identifier: GPL-2.0-only */

use core::mem::size_of;
use core::ptr::{addr_of, read_volatile};
use device::ErrorKind;

/// Time allowed for the PSP to take or complete a command
pub const PSP_CMD_TIMEOUT_MS: u64 = 1000;
/// Time allowed for the PSP to finish its own initialization
pub const PSP_INIT_TIMEOUT_MS: u64 = 10_000;

/// x86 to PSP commands
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MboxCommand {
    DramInfo = 0x01,
    SmmInfo = 0x02,
    SxInfo = 0x03,
    RsmInfo = 0x04,
    PspQuery = 0x05,
    BootDone = 0x06,
    ClearS3Sts = 0x07,
    S3DataInfo = 0x08,
    Nop = 0x09,
    HstiQuery = 0x14,
    SmuFw = 0x19,
    SmuFw2 = 0x1a,
    PsbAutoFusing = 0x21,
    SetSplFuse = 0x2d,
    QuerySplFuse = 0x47,
    Abort = 0xfe,
}

impl MboxCommand {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Sleep type sent with [`MboxCommand::SxInfo`] when entering S0
pub const SX_INFO_SLEEP_TYPE_S0: u8 = 0;
pub const SX_INFO_SLEEP_TYPE_S3: u8 = 3;
pub const SX_INFO_SLEEP_TYPE_S4: u8 = 4;
pub const SX_INFO_SLEEP_TYPE_S5: u8 = 5;

/// Failures of the mailbox handshake itself.
///
/// These are the PSPSTS codes; the status the PSP leaves in a command buffer
/// header is separate and only reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PspStatus {
    NoBase = 1,
    Halted = 2,
    Recovery = 3,
    SendError = 4,
    InitTimeout = 5,
    CmdTimeout = 6,
    InvalidName = 7,
    InvalidBlob = 8,
}

impl PspStatus {
    /// The negative value the C-style API returns
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoBase => "PSP base address not available",
            Self::Halted => "PSP halted",
            Self::Recovery => "PSP in recovery mode",
            Self::SendError => "error sending command",
            Self::InitTimeout => "PSP initialization timed out",
            Self::CmdTimeout => "PSP command timed out",
            Self::InvalidName => "invalid firmware name",
            Self::InvalidBlob => "invalid blob",
        }
    }
}

impl core::fmt::Display for PspStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl device::Error for PspStatus {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InitTimeout | Self::CmdTimeout => ErrorKind::Timeout,
            Self::Halted | Self::Recovery => ErrorKind::Busy,
            Self::InvalidName | Self::InvalidBlob => ErrorKind::InvalidArgument,
            Self::NoBase => ErrorKind::NoDevice,
            Self::SendError => ErrorKind::Protocol,
        }
    }
}

/// Common header of every command-response buffer
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MboxBufferHeader {
    /// Total size of the buffer, header included
    pub size: u32,
    /// Written by the PSP with the command's own status
    pub status: u32,
}

impl MboxBufferHeader {
    pub const fn for_buffer<B>() -> Self {
        Self {
            size: size_of::<B>() as u32,
            status: 0,
        }
    }
}

/// A command-response buffer handed to the PSP by physical address.
pub trait MboxBuffer {
    fn header(&self) -> &MboxBufferHeader;

    /// Status the PSP wrote back, read without assuming the compiler saw the
    /// store.
    fn response_status(&self) -> u32 {
        unsafe { read_volatile(addr_of!(self.header().status)) }
    }
}

#[repr(C, align(32))]
#[derive(Debug)]
pub struct MboxDefaultBuffer {
    pub header: MboxBufferHeader,
}

impl MboxDefaultBuffer {
    pub const fn new() -> Self {
        Self {
            header: MboxBufferHeader::for_buffer::<Self>(),
        }
    }
}

impl Default for MboxDefaultBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C, align(32))]
#[derive(Debug)]
pub struct MboxSxInfoBuffer {
    pub header: MboxBufferHeader,
    pub sleep_type: u8,
}

impl MboxSxInfoBuffer {
    pub const fn new(sleep_type: u8) -> Self {
        Self {
            header: MboxBufferHeader::for_buffer::<Self>(),
            sleep_type,
        }
    }
}

#[repr(C, align(32))]
#[derive(Debug)]
pub struct MboxHstiQueryBuffer {
    pub header: MboxBufferHeader,
    pub state: u32,
}

impl MboxHstiQueryBuffer {
    pub const fn new() -> Self {
        Self {
            header: MboxBufferHeader::for_buffer::<Self>(),
            state: 0,
        }
    }

    pub fn state(&self) -> u32 {
        unsafe { read_volatile(addr_of!(self.state)) }
    }
}

#[repr(C, align(32))]
#[derive(Debug)]
pub struct MboxSplBuffer {
    pub header: MboxBufferHeader,
    pub spl_value: u32,
}

impl MboxSplBuffer {
    pub const fn new() -> Self {
        Self {
            header: MboxBufferHeader::for_buffer::<Self>(),
            spl_value: 0,
        }
    }
}

/* SMM info address/width encodings */
pub const SMM_TRIGGER_IO: u32 = 0;
pub const SMM_TRIGGER_MEM: u32 = 1;

pub const SMM_TRIGGER_BYTE: u32 = 0;
pub const SMM_TRIGGER_WORD: u32 = 1;
pub const SMM_TRIGGER_DWORD: u32 = 2;

/// How the PSP raises an SMI towards the x86 cores
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SmmTriggerInfo {
    pub address: u64,
    pub address_type: u32,
    pub value_width: u32,
    pub value_and_mask: u32,
    pub value_or_mask: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SmmRegister {
    pub address: u64,
    pub address_type: u32,
    pub value_width: u32,
    pub reg_bit_mask: u32,
    pub expect_value: u32,
}

/// Registers the PSP checks before trusting an SMI to be delivered
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SmmRegisterInfo {
    pub smi_enb: SmmRegister,
    pub eos: SmmRegister,
    pub psp_smi_en: SmmRegister,
    pub reserved: [SmmRegister; 5],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SmmInfo {
    pub smm_base: u64,
    pub smm_mask: u64,
    pub psp_smm_data_region: u64,
    pub psp_smm_data_length: u64,
    pub smm_trigger_info: SmmTriggerInfo,
    pub smm_register_info: SmmRegisterInfo,
    pub psp_mbox_smm_buffer_address: u64,
    pub psp_mbox_smm_flag_address: u64,
}

#[repr(C, align(32))]
#[derive(Debug)]
pub struct MboxSmmInfoBuffer {
    pub header: MboxBufferHeader,
    pub info: SmmInfo,
}

impl MboxSmmInfoBuffer {
    pub const fn new(info: SmmInfo) -> Self {
        Self {
            header: MboxBufferHeader::for_buffer::<Self>(),
            info,
        }
    }
}

macro_rules! impl_mbox_buffer {
    ($($ty:ty),* $(,)?) => {
        $(impl MboxBuffer for $ty {
            fn header(&self) -> &MboxBufferHeader {
                &self.header
            }
        })*
    };
}

impl_mbox_buffer!(
    MboxDefaultBuffer,
    MboxSxInfoBuffer,
    MboxHstiQueryBuffer,
    MboxSplBuffer,
    MboxSmmInfoBuffer,
);

/* CORE_2_PSP_MSG_38 bits */
pub const C2P38_FUSE_SPL: u32 = 1 << 12;
pub const C2P38_SPL_FUSE_ERROR: u32 = 1 << 13;
pub const C2P38_SPL_ENTRY_ERROR: u32 = 1 << 14;
pub const C2P38_SPL_ENTRY_MISSING: u32 = 1 << 15;

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::align_of;

    #[test]
    fn buffers_are_aligned_and_sized_in_header() {
        assert_eq!(align_of::<MboxDefaultBuffer>(), 32);
        assert_eq!(MboxDefaultBuffer::new().header.size, 32);
        assert_eq!(MboxSxInfoBuffer::new(SX_INFO_SLEEP_TYPE_S3).header.size, 32);
        assert_eq!(size_of::<SmmRegister>(), 24);
        assert_eq!(size_of::<SmmTriggerInfo>(), 24);
        let smm = MboxSmmInfoBuffer::new(SmmInfo::default());
        assert_eq!(smm.header.size as usize, size_of::<MboxSmmInfoBuffer>());
        assert_eq!(smm.header.size % 32, 0);
    }

    #[test]
    fn status_codes_are_negative() {
        assert_eq!(PspStatus::CmdTimeout.code(), -6);
        assert_eq!(PspStatus::InvalidBlob.code(), -8);
        assert_eq!(PspStatus::Recovery.as_str(), "PSP in recovery mode");
    }
}
