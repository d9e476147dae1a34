//! Fixed-capacity device buffer.
//!
//! The buffer is allocated once from the host allocator and shared by every
//! open descriptor. Its capacity never changes; writes overwrite a prefix in
//! place and reads always see the whole region.

use tracing::{debug, error, info};

use crate::error::{DriverError, Result};
use crate::host::KernelAllocator;
use crate::uaccess::{UserSlice, UserSliceMut};

/// Default buffer capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Largest capacity accepted from configuration (the kmalloc limit).
pub const MAX_CAPACITY: usize = 4 * 1024 * 1024;

/// Driver-owned byte region.
pub struct DeviceBuffer {
    data: Box<[u8]>,
}

impl DeviceBuffer {
    /// Allocate a buffer of `capacity` bytes.
    pub fn allocate<H>(host: &H, capacity: usize) -> Result<Self>
    where
        H: KernelAllocator + ?Sized,
    {
        let data = host.kmalloc(capacity).map_err(|source| {
            error!(capacity, %source, "cannot allocate memory");
            DriverError::OutOfMemory { size: capacity }
        })?;

        if data.len() != capacity {
            error!(capacity, got = data.len(), "allocator returned wrong size");
            host.kfree(data);
            return Err(DriverError::OutOfMemory { size: capacity });
        }

        info!(capacity, "Allocated device buffer");
        Ok(Self { data })
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// First byte of the buffer.
    pub fn first(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Copy the whole buffer to the caller. Returns the number of bytes copied.
    pub fn copy_out(&self, dest: &mut UserSliceMut<'_>) -> Result<usize> {
        dest.copy_from(&self.data)?;
        debug!(len = self.data.len(), "Copied buffer to caller");
        Ok(self.data.len())
    }

    /// Overwrite the first `len` bytes with caller data.
    ///
    /// Lengths above capacity are rejected before any byte moves.
    pub fn copy_in(&mut self, src: &UserSlice<'_>, len: usize) -> Result<usize> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(DriverError::WriteTooLarge { len, capacity });
        }
        src.copy_into(&mut self.data[..len])?;
        debug!(len, "Copied caller data into buffer");
        Ok(len)
    }

    /// Return the memory to the host.
    pub fn free<H>(self, host: &H)
    where
        H: KernelAllocator + ?Sized,
    {
        debug!(capacity = self.capacity(), "Freeing device buffer");
        host.kfree(self.data);
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}
