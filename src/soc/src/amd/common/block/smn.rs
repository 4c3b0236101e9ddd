/* SPDX-License-Identifier: GPL-2.0-only */

use oreboot_asm::io::RegisterIo;
use spin::Mutex;

/// Index/data pair in the configuration space of the root complex (D0F0)
pub const SMN_INDEX_ADDR: usize = 0xb8;
pub const SMN_DATA_ADDR: usize = 0xbc;

/// Base of the PSP public registers on the system management network
pub const SMN_PSP_PUBLIC_BASE: u32 = 0x0380_0000;

/// A window onto the system management network.
///
/// Every access writes the index register and then touches the data register,
/// so the pair is held under a lock for the duration of one access. `base` is
/// added to the offsets handed to [`RegisterIo`].
pub struct Smn<P> {
    pci: Mutex<P>,
    base: u32,
}

impl<P: RegisterIo> Smn<P> {
    /// `pci` must address the configuration space of the root complex.
    pub const fn new(pci: P, base: u32) -> Self {
        Self {
            pci: Mutex::new(pci),
            base,
        }
    }

    pub fn into_inner(self) -> P {
        self.pci.into_inner()
    }

    fn address(&self, offset: usize) -> u32 {
        self.base.wrapping_add(offset as u32)
    }
}

impl<P: RegisterIo> RegisterIo for Smn<P> {
    fn read32(&self, offset: usize) -> u32 {
        let mut pci = self.pci.lock();
        pci.write32(SMN_INDEX_ADDR, self.address(offset));
        pci.read32(SMN_DATA_ADDR)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let addr = self.address(offset);
        let pci = self.pci.get_mut();
        pci.write32(SMN_INDEX_ADDR, addr);
        pci.write32(SMN_DATA_ADDR, value);
    }
}
