/* SPDX-License-Identifier: GPL-2.0-only */

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "amd")]
pub mod amd;
