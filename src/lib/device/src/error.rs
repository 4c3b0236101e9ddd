/* SPDX-License-Identifier: GPL-2.0-only */

use core::fmt::Debug;
use util::cb_err::CbErr;

pub trait Error: Debug {
    fn kind(&self) -> ErrorKind;
}

/// Device error kind that can be used across board implementations
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The function is unimplemented
    Unimplemented,
    /// The device or controller did not respond in time
    Timeout,
    /// No device is attached
    NoDevice,
    /// The device answered with something the protocol does not allow
    Protocol,
    /// The caller passed an argument the device cannot honour
    InvalidArgument,
    /// The transfer completed but the device reported a failure
    Io,
    /// The device is in a state where it cannot take commands
    Busy,
}

impl Error for core::convert::Infallible {
    fn kind(&self) -> ErrorKind {
        match *self {}
    }
}

impl Error for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unimplemented => write!(f, "The function is unimplemented"),
            Self::Timeout => write!(f, "The device timed out"),
            Self::NoDevice => write!(f, "No device present"),
            Self::Protocol => write!(f, "Protocol violation"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::Io => write!(f, "I/O error"),
            Self::Busy => write!(f, "The device is busy"),
        }
    }
}

impl From<ErrorKind> for CbErr {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Unimplemented => CbErr::ErrNotImplemented,
            ErrorKind::Timeout => CbErr::DeviceTimeout,
            ErrorKind::NoDevice => CbErr::DeviceNotPresent,
            ErrorKind::InvalidArgument => CbErr::ErrArg,
            ErrorKind::Io | ErrorKind::Protocol => CbErr::DeviceIo,
            ErrorKind::Busy => CbErr::DeviceBusy,
        }
    }
}

pub trait ErrorType {
    /// Error type
    type Error: Error;
}

impl<T: ErrorType> ErrorType for &mut T {
    type Error = T::Error;
}
