/* SPDX-License-Identifier: GPL-2.0-only */

//! Register window accessors, modelled on the u-boot/coreboot read32/write32
//! helpers but bound to a base address so that drivers can be handed any
//! register transport (memory-mapped, indexed, or a software model in tests).

use core::ptr::{read_volatile, write_volatile};

/// 32-bit register access relative to the start of a register block.
///
/// Offsets are in bytes. Values are little-endian as seen by the device.
pub trait RegisterIo {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&mut self, offset: usize, value: u32);

    /// Reads a 64-bit register as a low/high pair of 32-bit accesses.
    fn read64(&self, offset: usize) -> u64 {
        let lo = self.read32(offset) as u64;
        let hi = self.read32(offset + 4) as u64;
        (hi << 32) | lo
    }

    /// Writes a 64-bit register, low word first.
    fn write64(&mut self, offset: usize, value: u64) {
        self.write32(offset, value as u32);
        self.write32(offset + 4, (value >> 32) as u32);
    }

    fn setbits32(&mut self, offset: usize, set: u32) {
        let v = self.read32(offset);
        self.write32(offset, v | set);
    }

    fn clrbits32(&mut self, offset: usize, clear: u32) {
        let v = self.read32(offset);
        self.write32(offset, v & !clear);
    }

    fn clrsetbits32(&mut self, offset: usize, clear: u32, set: u32) {
        let v = self.read32(offset);
        self.write32(offset, (v & !clear) | set);
    }
}

impl<R: RegisterIo + ?Sized> RegisterIo for &mut R {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// A memory-mapped register block.
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the start of a device register block that stays mapped
    /// for the lifetime of the returned value, and nothing else may assume
    /// exclusive ownership of it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl RegisterIo for Mmio {
    fn read32(&self, offset: usize) -> u32 {
        let v = unsafe { read_volatile((self.base + offset) as *const u32) };
        u32::from_le(v)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        unsafe { write_volatile((self.base + offset) as *mut u32, value.to_le()) }
    }
}
