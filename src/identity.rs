//! Device numbers and the device-number allocator.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{DriverError, Result};
use crate::host::DeviceNumberTable;

/// Major number used by the fixed-assignment mode.
pub const STATIC_MAJOR: u32 = 255;

/// Minor number used by both modes.
pub const FIRST_MINOR: u32 = 0;

/// Largest major a `dev_t` can hold (12 bits).
pub const MAX_MAJOR: u32 = 0xFFF;

/// Largest minor a `dev_t` can hold (20 bits).
pub const MAX_MINOR: u32 = 0xF_FFFF;

/// A (major, minor) device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DevId {
    /// Which driver
    pub major: u32,
    /// Which instance handled by that driver
    pub minor: u32,
}

impl DevId {
    /// Build a device number from its parts.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// True if both parts fit the kernel's 12/20-bit `dev_t` split.
    pub const fn is_representable(&self) -> bool {
        self.major <= MAX_MAJOR && self.minor <= MAX_MINOR
    }
}

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// How the device number is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeviceNumbering {
    /// Host picks a free major; minor is fixed at 0
    Dynamic,
    /// Caller-chosen pair, reserved if free
    Static {
        /// Requested major
        #[serde(default = "default_static_major")]
        major: u32,
        /// Requested minor
        #[serde(default)]
        minor: u32,
    },
}

fn default_static_major() -> u32 {
    STATIC_MAJOR
}

impl Default for DeviceNumbering {
    fn default() -> Self {
        Self::Dynamic
    }
}

impl DeviceNumbering {
    /// The fixed (255, 0) assignment.
    pub fn fixed() -> Self {
        Self::Static {
            major: STATIC_MAJOR,
            minor: FIRST_MINOR,
        }
    }
}

/// Identity assigned to one loaded driver instance.
///
/// Immutable once assigned. Released exactly once through
/// [`DeviceIdentity::release`], which consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: DevId,
    name: String,
}

impl DeviceIdentity {
    /// Reserve a device number from the host.
    pub fn allocate<H>(host: &H, name: &str, numbering: DeviceNumbering) -> Result<Self>
    where
        H: DeviceNumberTable + ?Sized,
    {
        let id = match numbering {
            DeviceNumbering::Dynamic => host
                .alloc_chrdev_region(FIRST_MINOR, 1, name)
                .map_err(|source| {
                    error!(name, %source, "failed to register device number dynamically");
                    DriverError::Allocation {
                        name: name.to_string(),
                        source,
                    }
                })?,
            DeviceNumbering::Static { major, minor } => {
                let id = DevId::new(major, minor);
                host.register_chrdev_region(id, 1, name).map_err(|source| {
                    error!(name, %id, %source, "failed to register static device number");
                    DriverError::Allocation {
                        name: name.to_string(),
                        source,
                    }
                })?;
                id
            }
        };

        info!(name, major = id.major, minor = id.minor, ?numbering, "Reserved device number");

        Ok(Self {
            id,
            name: name.to_string(),
        })
    }

    /// The reserved device number.
    pub fn id(&self) -> DevId {
        self.id
    }

    /// Name the number was reserved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give the number back to the host.
    pub fn release<H>(self, host: &H)
    where
        H: DeviceNumberTable + ?Sized,
    {
        debug!(name = %self.name, id = %self.id, "Releasing device number");
        host.unregister_chrdev_region(self.id, 1);
    }
}
