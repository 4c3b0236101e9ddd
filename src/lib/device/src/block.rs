/* SPDX-License-Identifier: GPL-2.0-only */

use crate::{ErrorKind, ErrorType};

/// A device addressed in fixed-size logical blocks.
///
/// Buffers passed to [`read_blocks`](BlockDevice::read_blocks) and
/// [`write_blocks`](BlockDevice::write_blocks) must be a whole number of
/// blocks long, and the addressed range must lie inside the device.
pub trait BlockDevice: ErrorType {
    /// Size of one logical block in bytes
    fn block_size(&self) -> usize;

    /// Number of logical blocks on the device
    fn block_count(&self) -> u64;

    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> Result<(), Self::Error>;

    /// Capacity in bytes
    fn capacity(&self) -> u64 {
        self.block_count() * self.block_size() as u64
    }
}

/// Checks a block request against the device geometry and returns the number
/// of blocks it covers.
pub fn check_block_range(
    block_size: usize,
    block_count: u64,
    lba: u64,
    len: usize,
) -> Result<u64, ErrorKind> {
    if block_size == 0 || len % block_size != 0 {
        return Err(ErrorKind::InvalidArgument);
    }
    let blocks = (len / block_size) as u64;
    match lba.checked_add(blocks) {
        Some(end) if end <= block_count => Ok(blocks),
        _ => Err(ErrorKind::InvalidArgument),
    }
}
