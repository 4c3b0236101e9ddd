/* SPDX-License-Identifier: GPL-2.0-only */

#![cfg_attr(not(test), no_std)]

mod block;
mod error;

pub use self::{
    block::{check_block_range, BlockDevice},
    error::{Error, ErrorKind, ErrorType},
};
