/* SPDX-License-Identifier: GPL-2.0-only */

/**
 * coreboot error codes
 *
 * Common error definitions that can be used for any function. All error values
 * should be negative -- when useful, positive values can also be used to denote
 * success. Allocate a new group or errors every 100 values.
 */
#[repr(i32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CbErr {
    /// Call completed successfully
    Success = 0,
    /// Generic error code
    Err = -1,
    /// Invalid argument
    ErrArg = -2,
    /// Function not implemented
    ErrNotImplemented = -3,

    /* CBFS errors */
    /// Underlying I/O error
    CBFSIO = -400,
    /// File not found in directory
    CBFSNotFound = -401,
    /// Master hash validation failed
    CBFSHashMismatch = -402,
    /// Metadata cache overflowed
    CBFSCacheFull = -403,

    /* Device errors */
    /// Controller or device did not answer in time
    DeviceTimeout = -500,
    /// No device attached to the controller
    DeviceNotPresent = -501,
    /// Transfer failed or the device reported an error
    DeviceIo = -502,
    /// Controller or device is busy and cannot accept commands
    DeviceBusy = -503,
}

impl CbErr {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl core::fmt::Display for CbErr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Err => "generic error",
            Self::ErrArg => "invalid argument",
            Self::ErrNotImplemented => "not implemented",
            Self::CBFSIO => "CBFS I/O error",
            Self::CBFSNotFound => "CBFS file not found",
            Self::CBFSHashMismatch => "CBFS hash mismatch",
            Self::CBFSCacheFull => "CBFS metadata cache full",
            Self::DeviceTimeout => "device timeout",
            Self::DeviceNotPresent => "device not present",
            Self::DeviceIo => "device I/O error",
            Self::DeviceBusy => "device busy",
        };
        write!(f, "{} ({})", s, self.code())
    }
}
