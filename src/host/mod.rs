//! Host kernel services consumed by the driver.
//!
//! The driver never reimplements device-number tables, sysfs classes,
//! allocators or pin multiplexing. It reaches them through the traits in
//! this module, one per subsystem:
//!
//! ```text
//! ┌──────────────────────┐   alloc/register/unregister_chrdev_region
//! │ DeviceNumberTable    │
//! ├──────────────────────┤   cdev_add / cdev_del
//! │ CharDeviceTable      │
//! ├──────────────────────┤   class_create / device_create / *_destroy
//! │ DeviceClasses        │
//! ├──────────────────────┤   kmalloc / kfree
//! │ KernelAllocator      │
//! ├──────────────────────┤   gpio_request / direction_output / set / free
//! │ GpioChip             │
//! └──────────────────────┘
//! ```
//!
//! [`Host`] bundles all five and is implemented for anything that implements
//! them. [`sim::SimHost`] is an in-memory host for tests and the CLI.

pub mod sim;

use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatch::FileOperations;
use crate::error::HostError;
use crate::identity::DevId;
use crate::pin::Level;

/// Result of a host call.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Kernel-wide device-number reservations.
pub trait DeviceNumberTable: Send + Sync {
    /// Reserve `count` minors under a host-chosen major.
    fn alloc_chrdev_region(&self, baseminor: u32, count: u32, name: &str) -> HostResult<DevId>;

    /// Reserve `count` minors starting at `first`.
    fn register_chrdev_region(&self, first: DevId, count: u32, name: &str) -> HostResult<()>;

    /// Release a reservation made by either call above.
    fn unregister_chrdev_region(&self, first: DevId, count: u32);
}

/// Bindings from device numbers to operation tables.
pub trait CharDeviceTable: Send + Sync {
    /// Bind `ops` to `id`.
    fn cdev_add(&self, id: DevId, ops: Arc<dyn FileOperations>) -> HostResult<()>;

    /// Remove the binding for `id`.
    fn cdev_del(&self, id: DevId);
}

/// Class groupings and the device nodes published inside them.
pub trait DeviceClasses: Send + Sync {
    /// Create a class grouping.
    fn class_create(&self, name: &str) -> HostResult<()>;

    /// Destroy a class grouping. All its nodes must already be gone.
    fn class_destroy(&self, name: &str);

    /// Publish a node for `id` inside `class`. Returns the node path.
    fn device_create(&self, class: &str, id: DevId, name: &str) -> HostResult<PathBuf>;

    /// Remove the node for `id` from `class`.
    fn device_destroy(&self, class: &str, id: DevId);
}

/// Kernel memory.
pub trait KernelAllocator: Send + Sync {
    /// Allocate `size` bytes.
    fn kmalloc(&self, size: usize) -> HostResult<Box<[u8]>>;

    /// Return an allocation.
    fn kfree(&self, block: Box<[u8]>);
}

/// Legacy integer-numbered GPIO interface.
pub trait GpioChip: Send + Sync {
    /// Claim a line under `label`.
    fn gpio_request(&self, gpio: u32, label: &str) -> HostResult<()>;

    /// Configure a claimed line as output, driving `initial`.
    fn gpio_direction_output(&self, gpio: u32, initial: Level) -> HostResult<()>;

    /// Drive a configured output line.
    fn gpio_set_value(&self, gpio: u32, level: Level);

    /// Release a claimed line.
    fn gpio_free(&self, gpio: u32);
}

/// Every host service the driver needs.
pub trait Host:
    DeviceNumberTable + CharDeviceTable + DeviceClasses + KernelAllocator + GpioChip
{
}

impl<T> Host for T where
    T: DeviceNumberTable + CharDeviceTable + DeviceClasses + KernelAllocator + GpioChip
{
}
