/* SPDX-License-Identifier: GPL-2.0-only */

use super::{
    desc::{UFS_MAX_XFER, UFS_SCRATCH_SIZE},
    host::UfsHost,
    scsi::dma_capable,
    variant::UfsVariantOps,
    Error,
};
use device::{check_block_range, BlockDevice, ErrorType};
use log::{debug, error, info};
use oreboot_asm::io::RegisterIo;
use util::timer::MonotonicTimer;

/// One logical unit of a UFS device, addressed with READ(10)/WRITE(10).
pub struct UfsLun<'h, 'd, R, T, V> {
    host: &'h mut UfsHost<'d, R, T, V>,
    lun: u8,
    block_size: usize,
    block_count: u64,
}

impl<'h, 'd, R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> UfsLun<'h, 'd, R, T, V> {
    /// Waits for `lun` to become ready and reads its geometry.
    pub fn open(host: &'h mut UfsHost<'d, R, T, V>, lun: u8) -> Result<Self, Error> {
        host.wait_unit_ready(lun)?;
        let cap = host.read_capacity(lun)?;
        let block_size = cap.block_size as usize;
        /* A block must fit in one command's PRDT */
        if block_size == 0 || block_size % 4 != 0 || block_size > UFS_MAX_XFER {
            error!("UFS: LUN {} reports unusable block size {}", lun, block_size);
            return Err(Error::InvalidArgument);
        }
        info!(
            "UFS: LUN {} ready, {} blocks of {} bytes",
            lun,
            cap.block_count(),
            block_size
        );
        Ok(Self {
            host,
            lun,
            block_size,
            block_count: cap.block_count(),
        })
    }

    pub fn lun(&self) -> u8 {
        self.lun
    }

    pub fn host(&mut self) -> &mut UfsHost<'d, R, T, V> {
        &mut *self.host
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.host.synchronize_cache(self.lun)
    }

    /// Validates a request and returns the starting LBA as READ(10) wants it.
    fn check(&self, lba: u64, len: usize) -> Result<u32, Error> {
        let blocks = check_block_range(self.block_size, self.block_count, lba, len)
            .map_err(|_| Error::InvalidArgument)?;
        match (lba + blocks).checked_sub(1) {
            Some(last) if last > u32::MAX as u64 => Err(Error::InvalidArgument),
            _ => Ok(lba as u32),
        }
    }

    /// Blocks per command when transferring straight to the caller's buffer
    fn direct_chunk(&self) -> usize {
        (UFS_MAX_XFER / self.block_size).min(u16::MAX as usize) * self.block_size
    }

    /// Blocks per command when bouncing through the scratch area
    fn bounce_chunk(&self) -> Result<usize, Error> {
        match UFS_SCRATCH_SIZE / self.block_size {
            0 => Err(Error::InvalidArgument),
            n => Ok(n * self.block_size),
        }
    }
}

impl<R, T, V> ErrorType for UfsLun<'_, '_, R, T, V> {
    type Error = Error;
}

impl<R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> BlockDevice for UfsLun<'_, '_, R, T, V> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Error> {
        let mut lba = self.check(lba, buf.len())?;
        let (chunk, direct) = if dma_capable(buf) {
            (self.direct_chunk(), true)
        } else {
            debug!("UFS: unaligned read buffer, bouncing");
            (self.bounce_chunk()?, false)
        };
        for part in buf.chunks_mut(chunk) {
            let blocks = (part.len() / self.block_size) as u16;
            if direct {
                self.host.read_10(self.lun, lba, blocks, part)?;
            } else {
                self.host.read_10_bounced(self.lun, lba, blocks, part)?;
            }
            lba = lba.wrapping_add(blocks as u32);
        }
        Ok(())
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<(), Error> {
        let mut lba = self.check(lba, buf.len())?;
        let (chunk, direct) = if dma_capable(buf) {
            (self.direct_chunk(), true)
        } else {
            debug!("UFS: unaligned write buffer, bouncing");
            (self.bounce_chunk()?, false)
        };
        for part in buf.chunks(chunk) {
            let blocks = (part.len() / self.block_size) as u16;
            if direct {
                self.host.write_10(self.lun, lba, blocks, part)?;
            } else {
                self.host.write_10_bounced(self.lun, lba, blocks, part)?;
            }
            lba = lba.wrapping_add(blocks as u32);
        }
        Ok(())
    }
}
