/* SPDX-License-Identifier: GPL-2.0-only */

pub mod psp;
pub mod smn;
