//! In-memory host for tests and the command-line tool.
//!
//! [`SimHost`] implements every host service over shared state behind a
//! single lock. Clones share that state, so a test can hand one clone to the
//! driver and keep another to inspect what the driver left behind.
//!
//! # Fault injection
//!
//! [`SimHost::inject`] arms a one-shot failure for one host call. The next
//! invocation of that call fails with the errno a real kernel would most
//! likely report, and the arm is consumed. [`SimHost::occupy_number`] and
//! [`SimHost::occupy_pin`] simulate resources already held by someone else.
//!
//! # Audit
//!
//! [`SimHost::snapshot`] reports everything currently held through the host.
//! Misuse (freeing what was never allocated, destroying a class that still
//! has nodes, releasing a device number whose cdev is still bound) is
//! recorded as a violation instead of panicking, and makes the snapshot
//! unclean.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::dispatch::{FileHandle, FileOperations};
use crate::error::{Errno, HostError};
use crate::host::{
    CharDeviceTable, DeviceClasses, DeviceNumberTable, GpioChip, HostResult, KernelAllocator,
};
use crate::identity::{DevId, DeviceNumbering};
use crate::lifecycle::LoadStep;
use crate::pin::Level;

/// Highest major handed out dynamically.
pub const DYNAMIC_MAJOR_MAX: u32 = 511;

/// Lowest major handed out dynamically.
pub const DYNAMIC_MAJOR_MIN: u32 = 234;

/// Host calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    /// Dynamic device-number reservation
    AllocChrdevRegion,
    /// Static device-number reservation
    RegisterChrdevRegion,
    /// Character device binding
    CdevAdd,
    /// Class creation
    ClassCreate,
    /// Device node creation
    DeviceCreate,
    /// Buffer allocation
    Kmalloc,
    /// GPIO claim
    GpioRequest,
    /// GPIO output configuration
    GpioDirectionOutput,
}

impl HostOp {
    /// The host call made by a load step under the given numbering mode.
    pub fn for_step(step: LoadStep, numbering: DeviceNumbering) -> Self {
        match step {
            LoadStep::ReserveNumber => match numbering {
                DeviceNumbering::Dynamic => Self::AllocChrdevRegion,
                DeviceNumbering::Static { .. } => Self::RegisterChrdevRegion,
            },
            LoadStep::RegisterCdev => Self::CdevAdd,
            LoadStep::CreateClass => Self::ClassCreate,
            LoadStep::CreateNode => Self::DeviceCreate,
            LoadStep::AllocateBuffer => Self::Kmalloc,
            LoadStep::ClaimPin => Self::GpioRequest,
            LoadStep::ConfigurePin => Self::GpioDirectionOutput,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::AllocChrdevRegion => "alloc_chrdev_region",
            Self::RegisterChrdevRegion => "register_chrdev_region",
            Self::CdevAdd => "cdev_add",
            Self::ClassCreate => "class_create",
            Self::DeviceCreate => "device_create",
            Self::Kmalloc => "kmalloc",
            Self::GpioRequest => "gpio_request",
            Self::GpioDirectionOutput => "gpio_direction_output",
        }
    }

    fn injected_errno(self) -> Errno {
        match self {
            Self::AllocChrdevRegion
            | Self::RegisterChrdevRegion
            | Self::CdevAdd
            | Self::GpioRequest => Errno::EBUSY,
            Self::ClassCreate | Self::DeviceCreate => Errno::EEXIST,
            Self::Kmalloc => Errno::ENOMEM,
            Self::GpioDirectionOutput => Errno::EIO,
        }
    }
}

/// Something that happened to a GPIO line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    /// Claimed under a label
    Requested(String),
    /// Configured as output with an initial level
    Output(Level),
    /// Level driven
    Set(Level),
    /// Claim released
    Freed,
}

/// Point-in-time view of everything held through the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSnapshot {
    /// Device numbers reserved (excluding pre-occupied ones)
    pub reserved_numbers: Vec<DevId>,
    /// Device numbers with a bound operation table
    pub bound_cdevs: Vec<DevId>,
    /// Existing class groupings
    pub classes: Vec<String>,
    /// Existing device node paths
    pub nodes: Vec<PathBuf>,
    /// Outstanding allocations
    pub live_allocations: usize,
    /// Lines claimed (excluding pre-occupied ones)
    pub claimed_pins: Vec<u32>,
    /// Recorded misuse of the host interfaces
    pub violations: Vec<String>,
}

impl HostSnapshot {
    /// True if nothing is held and nothing was misused.
    pub fn is_clean(&self) -> bool {
        self.reserved_numbers.is_empty()
            && self.bound_cdevs.is_empty()
            && self.classes.is_empty()
            && self.nodes.is_empty()
            && self.live_allocations == 0
            && self.claimed_pins.is_empty()
            && self.violations.is_empty()
    }
}

#[derive(Debug)]
struct NodeEntry {
    class: String,
    id: DevId,
}

#[derive(Debug, Default)]
struct PinState {
    output: bool,
}

#[derive(Default)]
struct HostState {
    reserved: BTreeMap<DevId, String>,
    foreign_numbers: BTreeSet<DevId>,
    cdevs: BTreeMap<DevId, Arc<dyn FileOperations>>,
    classes: BTreeSet<String>,
    nodes: BTreeMap<PathBuf, NodeEntry>,
    live_allocations: usize,
    pins: BTreeMap<u32, PinState>,
    foreign_pins: BTreeMap<u32, String>,
    levels: BTreeMap<u32, Level>,
    pin_events: BTreeMap<u32, Vec<PinEvent>>,
    armed: HashSet<HostOp>,
    violations: Vec<String>,
}

impl HostState {
    fn take_fault(&mut self, op: HostOp) -> HostResult<()> {
        if self.armed.remove(&op) {
            warn!(op = op.name(), "Injected host failure");
            return Err(HostError::new(op.name(), op.injected_errno()));
        }
        Ok(())
    }

    fn number_taken(&self, id: DevId) -> bool {
        self.reserved.contains_key(&id) || self.foreign_numbers.contains(&id)
    }

    fn major_in_use(&self, major: u32) -> bool {
        self.reserved.keys().any(|id| id.major == major)
            || self.foreign_numbers.iter().any(|id| id.major == major)
    }

    fn violation(&mut self, message: String) {
        warn!(%message, "Host interface misuse");
        self.violations.push(message);
    }

    fn record_pin(&mut self, gpio: u32, event: PinEvent) {
        self.pin_events.entry(gpio).or_default().push(event);
    }
}

fn minor_range(first: u32, count: u32, op: &'static str) -> HostResult<Range<u32>> {
    let end = first
        .checked_add(count)
        .ok_or_else(|| HostError::new(op, Errno::EINVAL))?;
    Ok(first..end)
}

/// Shared in-memory host.
#[derive(Clone, Default)]
pub struct SimHost {
    inner: Arc<Mutex<HostState>>,
}

impl SimHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure for `op`.
    pub fn inject(&self, op: HostOp) {
        debug!(op = op.name(), "Arming host failure");
        self.inner.lock().armed.insert(op);
    }

    /// Mark a device number as held by another driver.
    pub fn occupy_number(&self, id: DevId) {
        self.inner.lock().foreign_numbers.insert(id);
    }

    /// Mark a GPIO line as claimed by another owner.
    pub fn occupy_pin(&self, gpio: u32, owner: &str) {
        self.inner.lock().foreign_pins.insert(gpio, owner.to_string());
    }

    /// Current audit view.
    pub fn snapshot(&self) -> HostSnapshot {
        let state = self.inner.lock();
        HostSnapshot {
            reserved_numbers: state.reserved.keys().copied().collect(),
            bound_cdevs: state.cdevs.keys().copied().collect(),
            classes: state.classes.iter().cloned().collect(),
            nodes: state.nodes.keys().cloned().collect(),
            live_allocations: state.live_allocations,
            claimed_pins: state.pins.keys().copied().collect(),
            violations: state.violations.clone(),
        }
    }

    /// Whether a device node exists at `path`.
    pub fn node_exists(&self, path: impl AsRef<Path>) -> bool {
        self.inner.lock().nodes.contains_key(path.as_ref())
    }

    /// Physical level of a line, if it has ever been driven.
    pub fn pin_level(&self, gpio: u32) -> Option<Level> {
        self.inner.lock().levels.get(&gpio).copied()
    }

    /// Everything that happened to a line, oldest first.
    pub fn pin_events(&self, gpio: u32) -> Vec<PinEvent> {
        self.inner
            .lock()
            .pin_events
            .get(&gpio)
            .cloned()
            .unwrap_or_default()
    }

    /// Open the device node at `path` the way a user process would.
    pub fn open(&self, path: impl AsRef<Path>) -> HostResult<FileHandle> {
        let path = path.as_ref();
        let ops = {
            let state = self.inner.lock();
            let node = state
                .nodes
                .get(path)
                .ok_or_else(|| HostError::new("open", Errno::ENOENT))?;
            state
                .cdevs
                .get(&node.id)
                .cloned()
                .ok_or_else(|| HostError::new("open", Errno::ENXIO))?
        };
        trace!(path = %path.display(), "Opening device node");
        FileHandle::open(ops).map_err(|e| HostError::new("open", e.errno()))
    }
}

impl std::fmt::Debug for SimHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHost")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl DeviceNumberTable for SimHost {
    fn alloc_chrdev_region(&self, baseminor: u32, count: u32, name: &str) -> HostResult<DevId> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::AllocChrdevRegion)?;

        let major = (DYNAMIC_MAJOR_MIN..=DYNAMIC_MAJOR_MAX)
            .rev()
            .find(|&major| !state.major_in_use(major))
            .ok_or_else(|| HostError::new("alloc_chrdev_region", Errno::EBUSY))?;

        let minors = minor_range(baseminor, count, "alloc_chrdev_region")?;
        for minor in minors {
            state.reserved.insert(DevId::new(major, minor), name.to_string());
        }
        Ok(DevId::new(major, baseminor))
    }

    fn register_chrdev_region(&self, first: DevId, count: u32, name: &str) -> HostResult<()> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::RegisterChrdevRegion)?;

        if first.major == 0 {
            return Err(HostError::new("register_chrdev_region", Errno::EINVAL));
        }
        let ids: Vec<DevId> = minor_range(first.minor, count, "register_chrdev_region")?
            .map(|minor| DevId::new(first.major, minor))
            .collect();
        if ids.iter().any(|&id| state.number_taken(id)) {
            return Err(HostError::new("register_chrdev_region", Errno::EBUSY));
        }
        for id in ids {
            state.reserved.insert(id, name.to_string());
        }
        Ok(())
    }

    fn unregister_chrdev_region(&self, first: DevId, count: u32) {
        let mut state = self.inner.lock();
        let Ok(minors) = minor_range(first.minor, count, "unregister_chrdev_region") else {
            state.violation(format!("unregister of {count} minors from {first} overflows"));
            return;
        };
        for minor in minors {
            let id = DevId::new(first.major, minor);
            if state.cdevs.contains_key(&id) {
                state.violation(format!("device number {id} released while cdev still bound"));
            }
            if state.reserved.remove(&id).is_none() {
                state.violation(format!("device number {id} released but not reserved"));
            }
        }
    }
}

impl CharDeviceTable for SimHost {
    fn cdev_add(&self, id: DevId, ops: Arc<dyn FileOperations>) -> HostResult<()> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::CdevAdd)?;

        if state.cdevs.contains_key(&id) {
            return Err(HostError::new("cdev_add", Errno::EBUSY));
        }
        if !state.reserved.contains_key(&id) {
            state.violation(format!("cdev_add on unreserved device number {id}"));
        }
        state.cdevs.insert(id, ops);
        Ok(())
    }

    fn cdev_del(&self, id: DevId) {
        let mut state = self.inner.lock();
        if state.cdevs.remove(&id).is_none() {
            state.violation(format!("cdev_del on unbound device number {id}"));
        }
    }
}

impl DeviceClasses for SimHost {
    fn class_create(&self, name: &str) -> HostResult<()> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::ClassCreate)?;

        if !state.classes.insert(name.to_string()) {
            return Err(HostError::new("class_create", Errno::EEXIST));
        }
        Ok(())
    }

    fn class_destroy(&self, name: &str) {
        let mut state = self.inner.lock();
        if state.nodes.values().any(|node| node.class == name) {
            state.violation(format!("class '{name}' destroyed while nodes remain"));
        }
        if !state.classes.remove(name) {
            state.violation(format!("class '{name}' destroyed but never created"));
        }
    }

    fn device_create(&self, class: &str, id: DevId, name: &str) -> HostResult<PathBuf> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::DeviceCreate)?;

        if !state.classes.contains(class) {
            return Err(HostError::new("device_create", Errno::ENODEV));
        }
        let path = PathBuf::from("/dev").join(name);
        if state.nodes.contains_key(&path) {
            return Err(HostError::new("device_create", Errno::EEXIST));
        }
        state.nodes.insert(
            path.clone(),
            NodeEntry {
                class: class.to_string(),
                id,
            },
        );
        Ok(path)
    }

    fn device_destroy(&self, class: &str, id: DevId) {
        let mut state = self.inner.lock();
        let path = state
            .nodes
            .iter()
            .find(|(_, node)| node.class == class && node.id == id)
            .map(|(path, _)| path.clone());
        match path {
            Some(path) => {
                state.nodes.remove(&path);
            }
            None => state.violation(format!("device_destroy for {id} in '{class}' with no node")),
        }
    }
}

impl KernelAllocator for SimHost {
    fn kmalloc(&self, size: usize) -> HostResult<Box<[u8]>> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::Kmalloc)?;

        let mut block = Vec::new();
        block
            .try_reserve_exact(size)
            .map_err(|_| HostError::new("kmalloc", Errno::ENOMEM))?;
        block.resize(size, 0u8);
        state.live_allocations += 1;
        Ok(block.into_boxed_slice())
    }

    fn kfree(&self, block: Box<[u8]>) {
        let mut state = self.inner.lock();
        if state.live_allocations == 0 {
            state.violation(format!("kfree of {} bytes with no live allocation", block.len()));
            return;
        }
        state.live_allocations -= 1;
    }
}

impl GpioChip for SimHost {
    fn gpio_request(&self, gpio: u32, label: &str) -> HostResult<()> {
        let mut state = self.inner.lock();
        state.take_fault(HostOp::GpioRequest)?;

        if state.foreign_pins.contains_key(&gpio) || state.pins.contains_key(&gpio) {
            return Err(HostError::new("gpio_request", Errno::EBUSY));
        }
        state.pins.insert(gpio, PinState::default());
        state.record_pin(gpio, PinEvent::Requested(label.to_string()));
        Ok(())
    }

    fn gpio_direction_output(&self, gpio: u32, initial: Level) -> HostResult<()> {
        let mut state = self.inner.lock();
        if !state.pins.contains_key(&gpio) {
            state.violation(format!("gpio_direction_output on unclaimed line {gpio}"));
            return Err(HostError::new("gpio_direction_output", Errno::EINVAL));
        }
        state.take_fault(HostOp::GpioDirectionOutput)?;

        if let Some(pin) = state.pins.get_mut(&gpio) {
            pin.output = true;
        }
        state.levels.insert(gpio, initial);
        state.record_pin(gpio, PinEvent::Output(initial));
        Ok(())
    }

    fn gpio_set_value(&self, gpio: u32, level: Level) {
        let mut state = self.inner.lock();
        let output = state.pins.get(&gpio).map(|pin| pin.output);
        match output {
            Some(true) => {
                state.levels.insert(gpio, level);
                state.record_pin(gpio, PinEvent::Set(level));
            }
            Some(false) => state.violation(format!("gpio_set_value on non-output line {gpio}")),
            None => state.violation(format!("gpio_set_value on unclaimed line {gpio}")),
        }
    }

    fn gpio_free(&self, gpio: u32) {
        let mut state = self.inner.lock();
        if state.pins.remove(&gpio).is_none() {
            state.violation(format!("gpio_free on unclaimed line {gpio}"));
            return;
        }
        state.record_pin(gpio, PinEvent::Freed);
    }
}
