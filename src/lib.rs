//! # GPIO Character Device Driver
//!
//! A character device exposing one fixed-size buffer and one GPIO output
//! line. User processes open the device node, read the whole buffer back,
//! and write to it; the first byte written drives the line (`'1'` high,
//! `'0'` low, anything else ignored).
//!
//! ## Crate Structure
//!
//! - **`host`**: The kernel services the driver consumes (device numbers,
//!   cdev table, classes, allocator, GPIO chip) as traits, plus
//!   `host::sim::SimHost`, an in-memory host with fault injection.
//! - **`identity`**: Device numbers and their reservation (dynamic or fixed).
//! - **`registrar`**: Character-device registration and node publication.
//! - **`buffer`**: The shared, fixed-capacity device buffer.
//! - **`pin`**: The single output line claim.
//! - **`uaccess`**: Caller memory regions and the copy boundary.
//! - **`dispatch`**: `FileOperations`, the per-descriptor state machine, and
//!   `GpioDevice`, which serialises every read and write behind one lock.
//! - **`unwind`**: Ordered release obligations.
//! - **`lifecycle`**: `GpioDriver::load` / `unload`.
//! - **`config`** / **`logging`** / **`error`**: Configuration, tracing
//!   setup and the error taxonomy.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gpio_chardev::{config::DriverConfig, host::sim::SimHost, lifecycle::GpioDriver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = SimHost::new();
//! let driver = GpioDriver::load(Arc::new(host.clone()), &DriverConfig::default())?;
//!
//! let mut file = host.open(driver.node_path())?;
//! file.write_all(b"1")?;
//! drop(file);
//!
//! driver.unload();
//! assert!(host.snapshot().is_clean());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod pin;
pub mod registrar;
pub mod uaccess;
pub mod unwind;

pub use config::DriverConfig;
pub use dispatch::{FileHandle, FileOperations, FileState, GpioDevice};
pub use error::{DriverError, Errno, HostError, Result};
pub use identity::{DevId, DeviceNumbering};
pub use lifecycle::{load_status, GpioDriver, LoadStep};
pub use pin::Level;
