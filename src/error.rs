//! Error types for the GPIO character device driver.
//!
//! Two layers of error exist:
//!
//! - [`HostError`]: a raw failure reported by one of the host collaborators
//!   (device-number table, class subsystem, allocator, GPIO chip). It carries
//!   the failing operation and an [`Errno`].
//! - [`DriverError`]: the driver's own taxonomy. Load-time variants wrap the
//!   `HostError` that caused them; per-request variants describe copy faults,
//!   bounds violations and descriptor misuse.
//!
//! Every `DriverError` maps to a negative status via [`DriverError::status`],
//! which is what a module loader or a failed `read(2)`/`write(2)` would see.

use std::fmt;

use thiserror::Error;

use crate::identity::DevId;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Subset of kernel errno values the driver can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    /// No such file or directory
    ENOENT = 2,
    /// I/O error
    EIO = 5,
    /// No such device or address
    ENXIO = 6,
    /// Bad file descriptor
    EBADF = 9,
    /// Out of memory
    ENOMEM = 12,
    /// Bad address
    EFAULT = 14,
    /// Device or resource busy
    EBUSY = 16,
    /// File exists
    EEXIST = 17,
    /// No such device
    ENODEV = 19,
    /// Invalid argument
    EINVAL = 22,
    /// File too large
    EFBIG = 27,
}

impl Errno {
    /// Positive errno value.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Negative status as returned to the loader or to user space.
    pub fn to_status(self) -> i32 {
        -(self as i32)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ENOENT => "ENOENT",
            Self::EIO => "EIO",
            Self::ENXIO => "ENXIO",
            Self::EBADF => "EBADF",
            Self::ENOMEM => "ENOMEM",
            Self::EFAULT => "EFAULT",
            Self::EBUSY => "EBUSY",
            Self::EEXIST => "EEXIST",
            Self::ENODEV => "ENODEV",
            Self::EINVAL => "EINVAL",
            Self::EFBIG => "EFBIG",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Failure reported by a host collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} failed: {errno}")]
pub struct HostError {
    /// Host call that failed (e.g. `"gpio_request"`)
    pub op: &'static str,
    /// Reported errno
    pub errno: Errno,
}

impl HostError {
    /// Create a host error for the given call.
    pub fn new(op: &'static str, errno: Errno) -> Self {
        Self { op, errno }
    }
}

/// Errors produced by the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The host refused to reserve a device number (in use, exhausted)
    #[error("Failed to reserve device number for '{name}': {source}")]
    Allocation {
        /// Name the number was requested under
        name: String,
        /// Host refusal
        #[source]
        source: HostError,
    },

    /// The device number is already bound to another character device
    #[error("Failed to register character device {id}: {source}")]
    Registration {
        /// Device number that could not be bound
        id: DevId,
        /// Host refusal
        #[source]
        source: HostError,
    },

    /// Class or device-node creation failed
    #[error("Failed to publish '{name}': {source}")]
    Publication {
        /// Class or node name
        name: String,
        /// Host refusal
        #[source]
        source: HostError,
    },

    /// Buffer allocation failed
    #[error("Cannot allocate {size}-byte device buffer")]
    OutOfMemory {
        /// Requested capacity in bytes
        size: usize,
    },

    /// The GPIO line is claimed elsewhere
    #[error("GPIO {gpio} is unavailable: {source}")]
    PinUnavailable {
        /// Global line number
        gpio: u32,
        /// Host refusal
        #[source]
        source: HostError,
    },

    /// Configuring the GPIO line as an output failed
    #[error("Cannot configure GPIO {gpio} as output: {source}")]
    PinConfig {
        /// Global line number
        gpio: u32,
        /// Host refusal
        #[source]
        source: HostError,
    },

    /// Caller memory is not accessible for the requested range
    #[error("Copy fault: {len} bytes requested, {accessible} accessible")]
    CopyFault {
        /// Bytes the copy needed
        len: usize,
        /// Bytes the caller actually has mapped
        accessible: usize,
    },

    /// A write larger than the device buffer
    #[error("Write of {len} bytes exceeds buffer capacity {capacity}")]
    WriteTooLarge {
        /// Requested write length
        len: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// Read/write attempted on a descriptor that is not open
    #[error("File descriptor is not open")]
    FileNotOpen,

    /// The device is not (or no longer) fully loaded
    #[error("Device resources are not installed")]
    NotReady,

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong
        message: String,
    },
}

impl DriverError {
    /// Errno this error is reported as.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Allocation { source, .. }
            | Self::Registration { source, .. }
            | Self::Publication { source, .. }
            | Self::PinConfig { source, .. } => source.errno,
            Self::OutOfMemory { .. } => Errno::ENOMEM,
            Self::PinUnavailable { .. } => Errno::EBUSY,
            Self::CopyFault { .. } => Errno::EFAULT,
            Self::WriteTooLarge { .. } => Errno::EFBIG,
            Self::FileNotOpen => Errno::EBADF,
            Self::NotReady => Errno::ENODEV,
            Self::InvalidConfig { .. } => Errno::EINVAL,
        }
    }

    /// Negative status code.
    pub fn status(&self) -> i32 {
        self.errno().to_status()
    }

    /// Check if this is a caller-memory copy fault.
    pub fn is_copy_fault(&self) -> bool {
        matches!(self, Self::CopyFault { .. })
    }

    /// Check if this error can only arise while loading the driver.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. }
                | Self::Registration { .. }
                | Self::Publication { .. }
                | Self::OutOfMemory { .. }
                | Self::PinUnavailable { .. }
                | Self::PinConfig { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_negative_errno() {
        let err = DriverError::OutOfMemory { size: 1024 };
        assert_eq!(err.status(), -12);

        let err = DriverError::CopyFault {
            len: 4,
            accessible: 0,
        };
        assert_eq!(err.status(), -14);
        assert!(err.is_copy_fault());
        assert!(!err.is_load_failure());
    }

    #[test]
    fn test_wrapped_host_errno_is_preserved() {
        let err = DriverError::PinConfig {
            gpio: 533,
            source: HostError::new("gpio_direction_output", Errno::EIO),
        };
        assert_eq!(err.errno(), Errno::EIO);
        assert!(err.is_load_failure());
        assert!(err.to_string().contains("533"));
    }

    #[test]
    fn test_errno_display() {
        assert_eq!(Errno::EBUSY.to_string(), "EBUSY (16)");
        assert_eq!(
            HostError::new("cdev_add", Errno::EBUSY).to_string(),
            "cdev_add failed: EBUSY (16)"
        );
    }
}
