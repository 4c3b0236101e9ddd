/* SPDX-License-Identifier: GPL-2.0-only */

//! The SCSI command subset UFS logical units implement, carried in
//! command UPIUs.

use super::{
    desc::DataDirection,
    host::UfsHost,
    upiu::{
        build_command, residual_count, response_sense, UPIU_CMD_FLAGS_NONE, UPIU_CMD_FLAGS_READ,
        UPIU_CMD_FLAGS_WRITE, UPIU_RESPONSE_TARGET_SUCCESS,
    },
    variant::UfsVariantOps,
    Error,
};
use log::{debug, warn};
use oreboot_asm::io::RegisterIo;
use util::timer::MonotonicTimer;

/* Opcodes */
pub const TEST_UNIT_READY: u8 = 0x00;
pub const REQUEST_SENSE: u8 = 0x03;
pub const INQUIRY: u8 = 0x12;
pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_10: u8 = 0x28;
pub const WRITE_10: u8 = 0x2a;
pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;

/* Status */
pub const SAM_STAT_GOOD: u8 = 0x00;
pub const SAM_STAT_CHECK_CONDITION: u8 = 0x02;
pub const SAM_STAT_BUSY: u8 = 0x08;
pub const SAM_STAT_TASK_SET_FULL: u8 = 0x28;

/* Sense keys */
pub const NO_SENSE: u8 = 0x0;
pub const RECOVERED_ERROR: u8 = 0x1;
pub const NOT_READY: u8 = 0x2;
pub const MEDIUM_ERROR: u8 = 0x3;
pub const HARDWARE_ERROR: u8 = 0x4;
pub const ILLEGAL_REQUEST: u8 = 0x5;
pub const UNIT_ATTENTION: u8 = 0x6;
pub const DATA_PROTECT: u8 = 0x7;

pub const INQUIRY_LEN: usize = 36;
pub const SENSE_LEN: usize = 18;
pub const READ_CAPACITY_10_LEN: usize = 8;

pub const fn cdb_test_unit_ready() -> [u8; 6] {
    [TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

pub const fn cdb_inquiry(alloc_len: u8) -> [u8; 6] {
    [INQUIRY, 0, 0, 0, alloc_len, 0]
}

pub const fn cdb_request_sense(alloc_len: u8) -> [u8; 6] {
    [REQUEST_SENSE, 0, 0, 0, alloc_len, 0]
}

pub const fn cdb_read_capacity_10() -> [u8; 10] {
    [READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

const fn cdb_rw10(opcode: u8, lba: u32, blocks: u16) -> [u8; 10] {
    let lba = lba.to_be_bytes();
    let len = blocks.to_be_bytes();
    [opcode, 0, lba[0], lba[1], lba[2], lba[3], 0, len[0], len[1], 0]
}

pub const fn cdb_read_10(lba: u32, blocks: u16) -> [u8; 10] {
    cdb_rw10(READ_10, lba, blocks)
}

pub const fn cdb_write_10(lba: u32, blocks: u16) -> [u8; 10] {
    cdb_rw10(WRITE_10, lba, blocks)
}

/// Flushes the whole unit.
pub const fn cdb_synchronize_cache_10() -> [u8; 10] {
    [SYNCHRONIZE_CACHE_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    /// Decodes fixed or descriptor format sense data.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data.first()? & 0x7f {
            0x70 | 0x71 if data.len() >= 14 => Some(Self {
                key: data[2] & 0xf,
                asc: data[12],
                ascq: data[13],
            }),
            0x72 | 0x73 if data.len() >= 4 => Some(Self {
                key: data[1] & 0xf,
                asc: data[2],
                ascq: data[3],
            }),
            _ => None,
        }
    }
}

impl From<Sense> for Error {
    fn from(sense: Sense) -> Self {
        Error::CheckCondition {
            key: sense.key,
            asc: sense.asc,
            ascq: sense.ascq,
        }
    }
}

/// Standard INQUIRY data
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inquiry {
    pub peripheral_type: u8,
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

impl Inquiry {
    pub fn parse(data: &[u8; INQUIRY_LEN]) -> Self {
        let mut vendor = [0; 8];
        let mut product = [0; 16];
        let mut revision = [0; 4];
        vendor.copy_from_slice(&data[8..16]);
        product.copy_from_slice(&data[16..32]);
        revision.copy_from_slice(&data[32..36]);
        Self {
            peripheral_type: data[0] & 0x1f,
            vendor,
            product,
            revision,
        }
    }

    pub fn vendor_str(&self) -> &str {
        ascii_field(&self.vendor)
    }

    pub fn product_str(&self) -> &str {
        ascii_field(&self.product)
    }

    pub fn revision_str(&self) -> &str {
        ascii_field(&self.revision)
    }
}

fn ascii_field(field: &[u8]) -> &str {
    core::str::from_utf8(field).unwrap_or("").trim_end_matches(|c: char| c == ' ' || c == '\0')
}

/// READ CAPACITY(10) data
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capacity {
    pub last_lba: u32,
    pub block_size: u32,
}

impl Capacity {
    pub fn parse(data: &[u8; READ_CAPACITY_10_LEN]) -> Self {
        Self {
            last_lba: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            block_size: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        }
    }

    pub fn block_count(&self) -> u64 {
        self.last_lba as u64 + 1
    }
}

/// Whether the controller can move data straight to or from `buf`.
pub(super) fn dma_capable(buf: &[u8]) -> bool {
    buf.as_ptr() as usize % 4 == 0 && buf.len() % 4 == 0
}

impl<'d, R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> UfsHost<'d, R, T, V> {
    /// Runs one SCSI command on `lun` with a data phase of `len` bytes at
    /// `addr` in direction `dir`.
    pub(super) fn scsi_cmd(
        &mut self,
        lun: u8,
        cdb: &[u8],
        dir: DataDirection,
        addr: u64,
        len: usize,
    ) -> Result<(), Error> {
        let flags = match dir {
            DataDirection::None => UPIU_CMD_FLAGS_NONE,
            DataDirection::HostToDevice => UPIU_CMD_FLAGS_WRITE,
            DataDirection::DeviceToHost => UPIU_CMD_FLAGS_READ,
        };
        let tag = self.next_tag();
        build_command(&mut self.dma.ucd.command_upiu, lun, tag, flags, len as u32, cdb);

        let rsp = self.send_request(dir, addr, len, self.config.scsi_timeout_ms)?;
        if rsp.header.response != UPIU_RESPONSE_TARGET_SUCCESS {
            warn!("UFS: LUN {} opcode {:#x} target failure {:#x}", lun, cdb[0], rsp.header.response);
            return Err(Error::UpiuResponse(rsp.header.response));
        }
        match rsp.header.status {
            SAM_STAT_GOOD => {
                let residual = residual_count(&rsp.raw);
                if residual != 0 {
                    debug!("UFS: LUN {} opcode {:#x} residual {}", lun, cdb[0], residual);
                }
                Ok(())
            }
            SAM_STAT_CHECK_CONDITION => {
                let sense = Sense::parse(response_sense(&rsp.raw)).unwrap_or_default();
                debug!(
                    "UFS: LUN {} opcode {:#x} check condition {:#x}/{:#x}/{:#x}",
                    lun, cdb[0], sense.key, sense.asc, sense.ascq
                );
                Err(sense.into())
            }
            status => {
                warn!("UFS: LUN {} opcode {:#x} status {:#x}", lun, cdb[0], status);
                Err(Error::ScsiStatus(status))
            }
        }
    }

    /// Reads a small data-in phase through the scratch area.
    fn scsi_cmd_in(&mut self, lun: u8, cdb: &[u8], out: &mut [u8]) -> Result<(), Error> {
        let addr = self.dma.scratch_addr();
        self.scsi_cmd(lun, cdb, DataDirection::DeviceToHost, addr, out.len())?;
        self.read_scratch(out);
        Ok(())
    }

    pub fn test_unit_ready(&mut self, lun: u8) -> Result<(), Error> {
        self.scsi_cmd(lun, &cdb_test_unit_ready(), DataDirection::None, 0, 0)
    }

    /// Polls TEST UNIT READY past the unit attention every unit reports
    /// after reset and while it is still becoming ready.
    pub fn wait_unit_ready(&mut self, lun: u8) -> Result<(), Error> {
        let mut result = self.test_unit_ready(lun);
        for _ in 1..self.config.unit_ready_retries {
            match result {
                Err(Error::CheckCondition { key, .. }) if key == UNIT_ATTENTION || key == NOT_READY => {
                    result = self.test_unit_ready(lun);
                }
                _ => break,
            }
        }
        result
    }

    pub fn inquiry(&mut self, lun: u8) -> Result<Inquiry, Error> {
        let mut data = [0u8; INQUIRY_LEN];
        self.scsi_cmd_in(lun, &cdb_inquiry(INQUIRY_LEN as u8), &mut data)?;
        Ok(Inquiry::parse(&data))
    }

    pub fn read_capacity(&mut self, lun: u8) -> Result<Capacity, Error> {
        let mut data = [0u8; READ_CAPACITY_10_LEN];
        self.scsi_cmd_in(lun, &cdb_read_capacity_10(), &mut data)?;
        Ok(Capacity::parse(&data))
    }

    pub fn request_sense(&mut self, lun: u8) -> Result<Sense, Error> {
        let mut data = [0u8; SENSE_LEN];
        self.scsi_cmd_in(lun, &cdb_request_sense(SENSE_LEN as u8), &mut data)?;
        Ok(Sense::parse(&data).unwrap_or_default())
    }

    /// READ(10) straight into `buf`, which must hold exactly `blocks`
    /// blocks and be dword aligned.
    pub fn read_10(&mut self, lun: u8, lba: u32, blocks: u16, buf: &mut [u8]) -> Result<(), Error> {
        if !dma_capable(buf) {
            return Err(Error::InvalidArgument);
        }
        let addr = buf.as_mut_ptr() as usize as u64;
        self.scsi_cmd(lun, &cdb_read_10(lba, blocks), DataDirection::DeviceToHost, addr, buf.len())
    }

    /// WRITE(10) straight from `buf`, same constraints as [`read_10`](Self::read_10).
    pub fn write_10(&mut self, lun: u8, lba: u32, blocks: u16, buf: &[u8]) -> Result<(), Error> {
        if !dma_capable(buf) {
            return Err(Error::InvalidArgument);
        }
        let addr = buf.as_ptr() as usize as u64;
        self.scsi_cmd(lun, &cdb_write_10(lba, blocks), DataDirection::HostToDevice, addr, buf.len())
    }

    /// READ(10) of at most one scratch area worth of blocks, copied into
    /// `buf` afterwards.
    pub(super) fn read_10_bounced(&mut self, lun: u8, lba: u32, blocks: u16, buf: &mut [u8]) -> Result<(), Error> {
        self.scsi_cmd_in(lun, &cdb_read_10(lba, blocks), buf)
    }

    pub(super) fn write_10_bounced(&mut self, lun: u8, lba: u32, blocks: u16, buf: &[u8]) -> Result<(), Error> {
        self.write_scratch(buf);
        let addr = self.dma.scratch_addr();
        self.scsi_cmd(lun, &cdb_write_10(lba, blocks), DataDirection::HostToDevice, addr, buf.len())
    }

    pub fn synchronize_cache(&mut self, lun: u8) -> Result<(), Error> {
        self.scsi_cmd(lun, &cdb_synchronize_cache_10(), DataDirection::None, 0, 0)
    }
}
