/* SPDX-License-Identifier: GPL-2.0-only */

//! In-memory structures shared with the host controller: the UTP transfer
//! request descriptor (UTRD), the physical region description table (PRDT)
//! and the UTP command descriptor (UCD) that holds both UPIUs.

use super::upiu::UPIU_AREA_SIZE;
use bitfield::bitfield;
use core::ptr::{addr_of, addr_of_mut, read_volatile, write_volatile};

pub const UFS_MAX_NUTRS: usize = 32;
pub const UFS_MAX_NUTMRS: usize = 8;
/// PRDT entries in the single command descriptor
pub const UFS_MAX_PRDT: usize = 8;
/// Largest byte count one PRDT entry can describe
pub const PRDT_DATA_BYTE_COUNT_MAX: usize = 256 * 1024;
/// Largest transfer the command descriptor can describe
pub const UFS_MAX_XFER: usize = UFS_MAX_PRDT * PRDT_DATA_BYTE_COUNT_MAX;

const UTMRD_SIZE: usize = 80;
pub const UFS_SCRATCH_SIZE: usize = 4096;

/* Command type */
pub const UTP_CMD_TYPE_UFS_STORAGE: u8 = 0x1;

/* Overall command status */
pub const OCS_SUCCESS: u8 = 0x0;
pub const OCS_INVALID_CMD_TABLE_ATTR: u8 = 0x1;
pub const OCS_INVALID_PRDT_ATTR: u8 = 0x2;
pub const OCS_MISMATCH_DATA_BUF_SIZE: u8 = 0x3;
pub const OCS_MISMATCH_RESP_UPIU_SIZE: u8 = 0x4;
pub const OCS_PEER_COMM_FAILURE: u8 = 0x5;
pub const OCS_ABORTED: u8 = 0x6;
pub const OCS_FATAL_ERROR: u8 = 0x7;
pub const OCS_INVALID_COMMAND_STATUS: u8 = 0xf;

/// Data direction of a transfer request, as seen from system memory
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataDirection {
    None = 0,
    /// System memory to device
    HostToDevice = 1,
    /// Device to system memory
    DeviceToHost = 2,
}

bitfield! {
    /// Dword 0 of a UTRD
    #[derive(Clone, Copy, Default)]
    pub struct UtrdHeader(u32);
    impl Debug;
    pub u8, command_type, set_command_type: 31, 28;
    pub u8, data_direction, set_data_direction: 26, 25;
    pub interrupt, set_interrupt: 24;
    pub crypto_enable, set_crypto_enable: 23;
    pub u8, crypto_config_index, set_crypto_config_index: 7, 0;
}

bitfield! {
    /// Dword 2 of a UTRD
    #[derive(Clone, Copy, Default)]
    pub struct UtrdStatus(u32);
    impl Debug;
    pub u8, ocs, set_ocs: 7, 0;
}

bitfield! {
    /// A length/offset pair in dwords, as used by UTRD dwords 6 and 7
    #[derive(Clone, Copy, Default)]
    pub struct LengthOffset(u32);
    impl Debug;
    pub u16, length, set_length: 15, 0;
    pub u16, offset, set_offset: 31, 16;
}

/// UTP transfer request descriptor
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Utrd {
    pub header: UtrdHeader,
    pub dunl: u32,
    pub status: UtrdStatus,
    pub dunu: u32,
    pub ucd_base_lo: u32,
    pub ucd_base_hi: u32,
    /// Response UPIU length and offset
    pub response: LengthOffset,
    /// PRDT length (entries) and offset
    pub prdt: LengthOffset,
}

/// One PRDT entry; `size` holds the byte count minus one.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PrdtEntry {
    pub base_lo: u32,
    pub base_hi: u32,
    pub reserved: u32,
    pub size: u32,
}

impl PrdtEntry {
    pub fn new(addr: u64, len: usize) -> Self {
        Self {
            base_lo: addr as u32,
            base_hi: (addr >> 32) as u32,
            reserved: 0,
            size: (len as u32 - 1) & 0x3ffff,
        }
    }

    pub fn addr(&self) -> u64 {
        (self.base_hi as u64) << 32 | self.base_lo as u64
    }

    pub fn byte_count(&self) -> usize {
        (self.size & 0x3ffff) as usize + 1
    }
}

/// UTP command descriptor
#[repr(C, align(128))]
pub struct CommandDescriptor {
    pub command_upiu: [u8; UPIU_AREA_SIZE],
    pub response_upiu: [u8; UPIU_AREA_SIZE],
    pub prdt: [PrdtEntry; UFS_MAX_PRDT],
}

#[repr(C, align(1024))]
pub struct TransferRequestList(pub [Utrd; UFS_MAX_NUTRS]);

#[repr(C, align(1024))]
pub struct TaskRequestList(pub [u8; UTMRD_SIZE * UFS_MAX_NUTMRS]);

/// Bounce space for small data phases and misaligned caller buffers
#[repr(C, align(4096))]
pub struct Scratch(pub [u8; UFS_SCRATCH_SIZE]);

/// Every piece of memory the host controller reads or writes.
///
/// Lives in static memory in firmware builds; the controller is given the
/// addresses of its fields directly, so it must not move while in use.
#[repr(C)]
pub struct UfsDmaArea {
    pub utrl: TransferRequestList,
    pub utmrl: TaskRequestList,
    pub ucd: CommandDescriptor,
    pub scratch: Scratch,
}

const UTRD_ZERO: Utrd = Utrd {
    header: UtrdHeader(0),
    dunl: 0,
    status: UtrdStatus(0),
    dunu: 0,
    ucd_base_lo: 0,
    ucd_base_hi: 0,
    response: LengthOffset(0),
    prdt: LengthOffset(0),
};

const PRDT_ZERO: PrdtEntry = PrdtEntry {
    base_lo: 0,
    base_hi: 0,
    reserved: 0,
    size: 0,
};

impl UfsDmaArea {
    pub const fn new() -> Self {
        Self {
            utrl: TransferRequestList([UTRD_ZERO; UFS_MAX_NUTRS]),
            utmrl: TaskRequestList([0; UTMRD_SIZE * UFS_MAX_NUTMRS]),
            ucd: CommandDescriptor {
                command_upiu: [0; UPIU_AREA_SIZE],
                response_upiu: [0; UPIU_AREA_SIZE],
                prdt: [PRDT_ZERO; UFS_MAX_PRDT],
            },
            scratch: Scratch([0; UFS_SCRATCH_SIZE]),
        }
    }

    pub fn utrl_addr(&self) -> u64 {
        addr_of!(self.utrl) as usize as u64
    }

    pub fn utmrl_addr(&self) -> u64 {
        addr_of!(self.utmrl) as usize as u64
    }

    pub fn ucd_addr(&self) -> u64 {
        addr_of!(self.ucd) as usize as u64
    }

    pub fn scratch_addr(&self) -> u64 {
        addr_of!(self.scratch) as usize as u64
    }

    /// Writes the descriptor for `slot` with the controller-visible volatile
    /// stores, the OCS preset to "invalid" so a stale success cannot be read.
    pub fn write_utrd(&mut self, slot: usize, dir: DataDirection, prdt_entries: usize) {
        let mut header = UtrdHeader::default();
        header.set_command_type(UTP_CMD_TYPE_UFS_STORAGE);
        header.set_data_direction(dir as u8);

        let mut status = UtrdStatus::default();
        status.set_ocs(OCS_INVALID_COMMAND_STATUS);

        let mut response = LengthOffset::default();
        response.set_offset((UPIU_AREA_SIZE >> 2) as u16);
        response.set_length((UPIU_AREA_SIZE >> 2) as u16);

        let mut prdt = LengthOffset::default();
        prdt.set_offset(((2 * UPIU_AREA_SIZE) >> 2) as u16);
        prdt.set_length(prdt_entries as u16);

        let ucd = self.ucd_addr();
        let utrd = Utrd {
            header,
            status,
            ucd_base_lo: ucd as u32,
            ucd_base_hi: (ucd >> 32) as u32,
            response,
            prdt,
            ..Default::default()
        };
        unsafe { write_volatile(addr_of_mut!(self.utrl.0[slot]), utrd) };
    }

    /// Overall command status the controller left in `slot`.
    pub fn ocs(&self, slot: usize) -> u8 {
        let status = unsafe { read_volatile(addr_of!(self.utrl.0[slot].status)) };
        status.ocs()
    }

    /// Describes `len` bytes at `addr` in the PRDT and returns the number of
    /// entries used, or `None` when the buffer does not fit.
    pub fn fill_prdt(&mut self, addr: u64, len: usize) -> Option<usize> {
        if len == 0 {
            return Some(0);
        }
        let entries = len.div_ceil(PRDT_DATA_BYTE_COUNT_MAX);
        if entries > UFS_MAX_PRDT {
            return None;
        }
        for (i, entry) in self.ucd.prdt.iter_mut().take(entries).enumerate() {
            let off = i * PRDT_DATA_BYTE_COUNT_MAX;
            let chunk = (len - off).min(PRDT_DATA_BYTE_COUNT_MAX);
            *entry = PrdtEntry::new(addr + off as u64, chunk);
        }
        Some(entries)
    }

    /// Clears the response UPIU so that a short response is never mistaken
    /// for the previous one.
    pub fn clear_response(&mut self) {
        self.ucd.response_upiu.fill(0);
    }
}

impl Default for UfsDmaArea {
    fn default() -> Self {
        Self::new()
    }
}
