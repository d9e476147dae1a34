//! Per-descriptor I/O dispatch.
//!
//! [`FileOperations`] is the operation table a character device is
//! registered with. [`GpioDevice`] implements it once for the whole driver:
//! one buffer and one pin claim, shared by every descriptor and guarded by a
//! single lock held for the full duration of each read and write.
//!
//! [`FileHandle`] is the caller's side of one open descriptor and owns the
//! Closed/Open state machine:
//!
//! ```text
//!            open                  release / drop
//!  Closed ──────────────▶ Open ───────────────────▶ Closed
//!                         │  ▲
//!                         └──┘ read / write
//! ```
//!
//! Read and write are refused with `FileNotOpen` unless the handle is Open.
//!
//! # Write protocol
//!
//! The payload is copied into the buffer, then the buffer's first byte is
//! interpreted: `'1'` drives the line high, `'0'` drives it low, anything
//! else is logged and ignored. The write still succeeds.
//!
//! # Read protocol
//!
//! Every read returns the whole buffer from offset 0, whatever length the
//! caller asked for.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::DeviceBuffer;
use crate::error::{DriverError, Result};
use crate::host::Host;
use crate::pin::{Level, PinClaim};
use crate::uaccess::{UserSlice, UserSliceMut};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one open descriptor as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContext {
    id: u64,
}

impl FileContext {
    fn next() -> Self {
        Self {
            id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Descriptor id, unique for the process lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Operation table bound to a character device.
pub trait FileOperations: Send + Sync {
    /// A descriptor was opened.
    fn open(&self, file: &FileContext) -> Result<()>;

    /// Copy device data to `dest`. Returns the number of bytes copied.
    fn read(&self, file: &FileContext, dest: &mut UserSliceMut<'_>, requested: usize)
        -> Result<usize>;

    /// Copy `len` bytes from `src` into the device. Returns the number of
    /// bytes consumed.
    fn write(&self, file: &FileContext, src: &UserSlice<'_>, len: usize) -> Result<usize>;

    /// A descriptor was closed.
    fn release(&self, file: &FileContext) -> Result<()>;
}

/// State of a [`FileHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not usable for I/O
    Closed,
    /// Open; read and write are dispatched
    Open,
}

/// One open descriptor on a device node.
pub struct FileHandle {
    ctx: FileContext,
    state: FileState,
    ops: Arc<dyn FileOperations>,
}

impl FileHandle {
    /// Open a new descriptor on `ops`.
    pub fn open(ops: Arc<dyn FileOperations>) -> Result<Self> {
        let ctx = FileContext::next();
        ops.open(&ctx)?;
        Ok(Self {
            ctx,
            state: FileState::Open,
            ops,
        })
    }

    /// Descriptor context.
    pub fn context(&self) -> FileContext {
        self.ctx
    }

    /// Current state.
    pub fn state(&self) -> FileState {
        self.state
    }

    /// Read into a caller region, asking for `requested` bytes.
    pub fn read(&mut self, dest: &mut UserSliceMut<'_>, requested: usize) -> Result<usize> {
        self.ensure_open()?;
        self.ops.read(&self.ctx, dest, requested)
    }

    /// Write `len` bytes from a caller region.
    pub fn write(&mut self, src: &UserSlice<'_>, len: usize) -> Result<usize> {
        self.ensure_open()?;
        self.ops.write(&self.ctx, src, len)
    }

    /// Read into `out`, requesting `out.len()` bytes.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<usize> {
        let requested = out.len();
        self.read(&mut UserSliceMut::new(out), requested)
    }

    /// Write all of `data`.
    pub fn write_all(&mut self, data: &[u8]) -> Result<usize> {
        self.write(&UserSlice::new(data), data.len())
    }

    /// Close the descriptor. Closing twice fails with `FileNotOpen`.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = FileState::Closed;
        self.ops.release(&self.ctx)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            FileState::Open => Ok(()),
            FileState::Closed => Err(DriverError::FileNotOpen),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.state == FileState::Open {
            self.state = FileState::Closed;
            if let Err(e) = self.ops.release(&self.ctx) {
                warn!(fd = self.ctx.id, error = %e, "release on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.ctx.id)
            .field("state", &self.state)
            .finish()
    }
}

/// Resources reached by read and write.
#[derive(Debug, Default)]
struct IoState {
    buffer: Option<DeviceBuffer>,
    pin: Option<PinClaim>,
}

/// The driver instance behind the device node.
pub struct GpioDevice {
    host: Arc<dyn Host>,
    state: Mutex<IoState>,
    open_count: AtomicUsize,
}

impl GpioDevice {
    /// Create a device with no buffer or pin installed yet.
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            state: Mutex::new(IoState::default()),
            open_count: AtomicUsize::new(0),
        }
    }

    /// Number of currently open descriptors.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    /// True once both the buffer and a configured output pin are installed.
    pub fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.buffer.is_some() && state.pin.as_ref().is_some_and(|p| p.direction().is_some())
    }

    /// Level last driven on the pin, if one is installed and configured.
    pub fn pin_level(&self) -> Option<Level> {
        self.state.lock().pin.as_ref().and_then(PinClaim::level)
    }

    /// Copy of the buffer contents, if installed.
    pub fn buffer_snapshot(&self) -> Option<Vec<u8>> {
        self.state.lock().buffer.as_ref().map(|b| b.as_bytes().to_vec())
    }

    pub(crate) fn install_buffer(&self, buffer: DeviceBuffer) {
        self.state.lock().buffer = Some(buffer);
    }

    pub(crate) fn take_buffer(&self) -> Option<DeviceBuffer> {
        self.state.lock().buffer.take()
    }

    pub(crate) fn install_pin(&self, claim: PinClaim) {
        self.state.lock().pin = Some(claim);
    }

    pub(crate) fn configure_pin(&self) -> Result<()> {
        let mut state = self.state.lock();
        let pin = state.pin.as_mut().ok_or(DriverError::NotReady)?;
        pin.configure_output(&*self.host)
    }

    pub(crate) fn take_pin(&self) -> Option<PinClaim> {
        self.state.lock().pin.take()
    }
}

impl FileOperations for GpioDevice {
    fn open(&self, file: &FileContext) -> Result<()> {
        let open = self.open_count.fetch_add(1, Ordering::AcqRel) + 1;
        info!(fd = file.id(), open, "Device file opened");
        Ok(())
    }

    fn read(
        &self,
        file: &FileContext,
        dest: &mut UserSliceMut<'_>,
        requested: usize,
    ) -> Result<usize> {
        let state = self.state.lock();
        let buffer = state.buffer.as_ref().ok_or(DriverError::NotReady)?;

        if requested != buffer.capacity() {
            debug!(
                fd = file.id(),
                requested,
                capacity = buffer.capacity(),
                "Read length ignored; returning full buffer"
            );
        }

        let copied = buffer.copy_out(dest).map_err(|e| {
            warn!(fd = file.id(), error = %e, "Data read error");
            e
        })?;
        debug!(fd = file.id(), copied, "Data read");
        Ok(copied)
    }

    fn write(&self, file: &FileContext, src: &UserSlice<'_>, len: usize) -> Result<usize> {
        let mut guard = self.state.lock();
        let IoState { buffer, pin } = &mut *guard;
        let (Some(buffer), Some(pin)) = (buffer.as_mut(), pin.as_mut()) else {
            return Err(DriverError::NotReady);
        };
        if pin.direction().is_none() {
            return Err(DriverError::NotReady);
        }

        if len == 0 {
            debug!(fd = file.id(), "Empty write");
            return Ok(0);
        }

        buffer.copy_in(src, len).map_err(|e| {
            warn!(fd = file.id(), len, error = %e, "Data write error");
            e
        })?;

        let command = buffer.first().unwrap_or_default();
        match Level::from_command(command) {
            Some(level) => {
                pin.set_level(&*self.host, level)?;
                info!(fd = file.id(), len, gpio = pin.gpio(), %level, "Data written; pin updated");
            }
            None => {
                warn!(
                    fd = file.id(),
                    len,
                    command = %char::from(command).escape_default(),
                    "Data written; ignoring invalid command byte"
                );
            }
        }
        Ok(len)
    }

    fn release(&self, file: &FileContext) -> Result<()> {
        let open = self.open_count.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        info!(fd = file.id(), open, "Device file released");
        Ok(())
    }
}

impl std::fmt::Debug for GpioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioDevice")
            .field("open_count", &self.open_count())
            .field("ready", &self.is_ready())
            .finish()
    }
}
