/* SPDX-License-Identifier: GPL-2.0-only */

//! Universal Flash Storage host controller driver.
//!
//! Brings up a UFSHCI controller and its attached device far enough to read
//! and write logical units with polled, single-slot transfers. Submodules
//! split the layers the way the standard does: UIC link management in
//! [`uic`], transfer requests in [`host`], device management queries in
//! [`query`] and the SCSI command set in [`scsi`].

pub mod config;
pub mod desc;
pub mod host;
pub mod lun;
pub mod query;
pub mod regs;
pub mod scsi;
pub mod uic;
pub mod upiu;
pub mod variant;

pub use config::UfsConfig;
pub use desc::UfsDmaArea;
pub use host::UfsHost;
pub use lun::UfsLun;
pub use query::{DeviceInfo, UnitInfo};
pub use uic::{HsRate, PowerMode, PwrMode, UicCmd, UicCommand};
pub use variant::{GenericUfs, NotifyStage, UfsVariantOps};

use device::ErrorKind;

/// Step that ran out of time
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    HostEnable,
    HostDisable,
    UicReady,
    UicCommand,
    PowerModeChange,
    Hibernate,
    TransferRequest,
    DeviceInit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    Timeout(Stage),
    /// A UIC command completed with a non-zero result code
    UicResult { cmd: u8, result: u8 },
    /// The link came up without a device behind it
    NoDevice,
    /// Transfer or task lists never reported ready after being programmed
    ListsNotReady,
    /// Controller reported a non-zero overall command status
    Ocs(u8),
    /// The response UPIU had an unexpected transaction code
    BadResponse { expected: u8, got: u8 },
    TaskTagMismatch { expected: u8, got: u8 },
    /// The device rejected the request UPIU
    Rejected,
    /// Target failure in the response field of a response UPIU
    UpiuResponse(u8),
    /// Query response code other than success
    QueryResponse(u8),
    /// SCSI status other than GOOD or CHECK CONDITION
    ScsiStatus(u8),
    CheckCondition { key: u8, asc: u8, ascq: u8 },
    /// Power mode change ended with this UPMCRS value
    PowerModeStatus(u8),
    InvalidArgument,
    /// The transfer slot is still owned by the controller
    Busy,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout(stage) => write!(f, "timeout during {:?}", stage),
            Self::UicResult { cmd, result } => {
                write!(f, "UIC command {:#x} failed with result {:#x}", cmd, result)
            }
            Self::NoDevice => write!(f, "no device present"),
            Self::ListsNotReady => write!(f, "request lists not ready"),
            Self::Ocs(ocs) => write!(f, "overall command status {:#x}", ocs),
            Self::BadResponse { expected, got } => {
                write!(f, "expected UPIU {:#x}, got {:#x}", expected, got)
            }
            Self::TaskTagMismatch { expected, got } => {
                write!(f, "expected task tag {}, got {}", expected, got)
            }
            Self::Rejected => write!(f, "request UPIU rejected"),
            Self::UpiuResponse(r) => write!(f, "target failure {:#x}", r),
            Self::QueryResponse(r) => write!(f, "query failed with response {:#x}", r),
            Self::ScsiStatus(s) => write!(f, "SCSI status {:#x}", s),
            Self::CheckCondition { key, asc, ascq } => {
                write!(f, "check condition, sense {:#x}/{:#x}/{:#x}", key, asc, ascq)
            }
            Self::PowerModeStatus(s) => write!(f, "power mode change status {:#x}", s),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Busy => write!(f, "transfer slot busy"),
        }
    }
}

impl device::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NoDevice => ErrorKind::NoDevice,
            Self::InvalidArgument => ErrorKind::InvalidArgument,
            Self::Busy | Self::ListsNotReady => ErrorKind::Busy,
            Self::BadResponse { .. } | Self::TaskTagMismatch { .. } | Self::Rejected => ErrorKind::Protocol,
            Self::UicResult { .. }
            | Self::Ocs(_)
            | Self::UpiuResponse(_)
            | Self::QueryResponse(_)
            | Self::ScsiStatus(_)
            | Self::CheckCondition { .. }
            | Self::PowerModeStatus(_) => ErrorKind::Io,
        }
    }
}
