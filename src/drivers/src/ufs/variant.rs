/* SPDX-License-Identifier: GPL-2.0-only */

//! Vendor hooks around the generic bring-up sequence.

use super::{uic::PowerMode, Error};
use oreboot_asm::io::RegisterIo;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyStage {
    Pre,
    Post,
}

/// Controller quirks. Each hook runs once before and once after the generic
/// step it names and may touch vendor registers through `regs`. The
/// defaults do nothing.
pub trait UfsVariantOps {
    /// `Pre` runs with the controller already stopped, right before HCE is set.
    fn hce_enable_notify(&mut self, _regs: &mut dyn RegisterIo, _stage: NotifyStage) -> Result<(), Error> {
        Ok(())
    }

    fn link_startup_notify(&mut self, _regs: &mut dyn RegisterIo, _stage: NotifyStage) -> Result<(), Error> {
        Ok(())
    }

    /// On `Pre`, may adjust the mode about to be requested.
    fn pwr_change_notify(
        &mut self,
        _regs: &mut dyn RegisterIo,
        _stage: NotifyStage,
        _mode: &mut PowerMode,
    ) -> Result<(), Error> {
        Ok(())
    }
}

impl<V: UfsVariantOps + ?Sized> UfsVariantOps for &mut V {
    fn hce_enable_notify(&mut self, regs: &mut dyn RegisterIo, stage: NotifyStage) -> Result<(), Error> {
        (**self).hce_enable_notify(regs, stage)
    }

    fn link_startup_notify(&mut self, regs: &mut dyn RegisterIo, stage: NotifyStage) -> Result<(), Error> {
        (**self).link_startup_notify(regs, stage)
    }

    fn pwr_change_notify(
        &mut self,
        regs: &mut dyn RegisterIo,
        stage: NotifyStage,
        mode: &mut PowerMode,
    ) -> Result<(), Error> {
        (**self).pwr_change_notify(regs, stage, mode)
    }
}

/// A controller that follows UFSHCI with no quirks
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericUfs;

impl UfsVariantOps for GenericUfs {}
