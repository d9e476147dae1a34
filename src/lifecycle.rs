//! Load and unload of the driver instance.
//!
//! Loading acquires resources in a fixed order:
//!
//! ```text
//! reserve_number → register_cdev → create_class → create_node
//!                → allocate_buffer → claim_pin → configure_pin
//! ```
//!
//! Every acquisition that succeeds pushes its release onto an
//! [`UnwindStack`]. If a later step fails, the stack is discharged right
//! away, so only what was actually acquired is released, newest first, and
//! the failing step's error is returned. A loaded [`GpioDriver`] keeps the same
//! stack and discharges it in full on [`GpioDriver::unload`]. The pin's
//! release drives the line low before freeing it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::buffer::DeviceBuffer;
use crate::config::DriverConfig;
use crate::dispatch::{FileHandle, FileOperations, GpioDevice};
use crate::error::{DriverError, Result};
use crate::host::Host;
use crate::identity::{DevId, DeviceIdentity};
use crate::pin::PinClaim;
use crate::registrar::{CdevRegistration, ClassEntry, DeviceFile};
use crate::unwind::UnwindStack;

/// One acquisition step of the load sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStep {
    /// Reserve the device number
    ReserveNumber,
    /// Bind the operation table to the number
    RegisterCdev,
    /// Create the class grouping
    CreateClass,
    /// Publish the device node
    CreateNode,
    /// Allocate the shared buffer
    AllocateBuffer,
    /// Claim the output line
    ClaimPin,
    /// Configure the line as output
    ConfigurePin,
}

impl LoadStep {
    /// Every step, in load order.
    pub const ALL: [LoadStep; 7] = [
        LoadStep::ReserveNumber,
        LoadStep::RegisterCdev,
        LoadStep::CreateClass,
        LoadStep::CreateNode,
        LoadStep::AllocateBuffer,
        LoadStep::ClaimPin,
        LoadStep::ConfigurePin,
    ];

    /// Stable snake_case name.
    pub fn label(self) -> &'static str {
        match self {
            Self::ReserveNumber => "reserve_number",
            Self::RegisterCdev => "register_cdev",
            Self::CreateClass => "create_class",
            Self::CreateNode => "create_node",
            Self::AllocateBuffer => "allocate_buffer",
            Self::ClaimPin => "claim_pin",
            Self::ConfigurePin => "configure_pin",
        }
    }
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LoadStep {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|step| step.label() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|step| step.label()).collect();
                format!("unknown load step '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

type StepResult<T> = std::result::Result<T, (LoadStep, DriverError)>;

fn at<T>(step: LoadStep, result: Result<T>) -> StepResult<T> {
    result.map_err(|e| (step, e))
}

/// A loaded driver instance.
///
/// Holds every acquired resource until [`GpioDriver::unload`]. Dropping a
/// loaded driver without unloading it still releases everything, with a
/// warning.
pub struct GpioDriver {
    device: Arc<GpioDevice>,
    id: DevId,
    node_path: PathBuf,
    config: DriverConfig,
    releases: UnwindStack,
}

impl GpioDriver {
    /// Run the load sequence against `host`.
    ///
    /// On failure nothing acquired by this call remains held and the error
    /// of the failing step is returned.
    pub fn load(host: Arc<dyn Host>, config: &DriverConfig) -> Result<Self> {
        config.validate()?;

        let device = Arc::new(GpioDevice::new(host.clone()));
        let mut releases = UnwindStack::new();

        match Self::acquire(&host, &device, config, &mut releases) {
            Ok((id, node_path)) => {
                info!(
                    major = id.major,
                    minor = id.minor,
                    node = %node_path.display(),
                    gpio = config.gpio.line(),
                    "Device Driver Insert...Done!!!"
                );
                Ok(Self {
                    device,
                    id,
                    node_path,
                    config: config.clone(),
                    releases,
                })
            }
            Err((step, err)) => {
                warn!(%step, error = %err, pending = releases.len(), "Load failed; unwinding");
                let released = releases.discharge();
                info!(?released, "Unwind complete");
                Err(err)
            }
        }
    }

    fn acquire(
        host: &Arc<dyn Host>,
        device: &Arc<GpioDevice>,
        config: &DriverConfig,
        releases: &mut UnwindStack,
    ) -> StepResult<(DevId, PathBuf)> {
        let identity = at(
            LoadStep::ReserveNumber,
            DeviceIdentity::allocate(&**host, &config.device_name, config.numbering),
        )?;
        let id = identity.id();
        let h = host.clone();
        releases.push(LoadStep::ReserveNumber.label(), move || identity.release(&*h));

        let ops: Arc<dyn FileOperations> = device.clone();
        let registration = at(
            LoadStep::RegisterCdev,
            CdevRegistration::register(&**host, id, ops),
        )?;
        let h = host.clone();
        releases.push(LoadStep::RegisterCdev.label(), move || registration.unregister(&*h));

        let class = at(
            LoadStep::CreateClass,
            ClassEntry::create(&**host, &config.class_name),
        )?;
        let h = host.clone();
        releases.push(LoadStep::CreateClass.label(), move || class.destroy(&*h));

        let file = at(
            LoadStep::CreateNode,
            DeviceFile::create(&**host, &config.class_name, id, &config.device_name),
        )?;
        let node_path = file.path().to_path_buf();
        let h = host.clone();
        releases.push(LoadStep::CreateNode.label(), move || file.destroy(&*h));

        let buffer = at(
            LoadStep::AllocateBuffer,
            DeviceBuffer::allocate(&**host, config.buffer_size),
        )?;
        device.install_buffer(buffer);
        let (h, d) = (host.clone(), device.clone());
        releases.push(LoadStep::AllocateBuffer.label(), move || {
            if let Some(buffer) = d.take_buffer() {
                buffer.free(&*h);
            }
        });

        let claim = at(
            LoadStep::ClaimPin,
            PinClaim::claim(&**host, config.gpio.pin, config.gpio.offset, &config.gpio.label),
        )?;
        device.install_pin(claim);
        let (h, d) = (host.clone(), device.clone());
        releases.push(LoadStep::ClaimPin.label(), move || {
            if let Some(claim) = d.take_pin() {
                claim.release(&*h);
            }
        });

        // Configuration is undone by the claim's release.
        at(LoadStep::ConfigurePin, device.configure_pin())?;

        Ok((id, node_path))
    }

    /// Release every resource in reverse acquisition order.
    pub fn unload(mut self) {
        let open = self.device.open_count();
        if open > 0 {
            warn!(open, "Unloading with descriptors still open");
        }
        let released = self.releases.discharge();
        info!(?released, "Device Driver Remove...Done!!!");
    }

    /// Assigned device number.
    pub fn id(&self) -> DevId {
        self.id
    }

    /// Assigned major number.
    pub fn major(&self) -> u32 {
        self.id.major
    }

    /// Assigned minor number.
    pub fn minor(&self) -> u32 {
        self.id.minor
    }

    /// Published node path.
    pub fn node_path(&self) -> &Path {
        &self.node_path
    }

    /// The driver instance behind the node.
    pub fn device(&self) -> &Arc<GpioDevice> {
        &self.device
    }

    /// Configuration the driver was loaded with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Pending release steps, in acquisition order.
    pub fn pending_releases(&self) -> Vec<&'static str> {
        self.releases.labels()
    }

    /// Open a descriptor directly on the driver instance.
    pub fn open(&self) -> Result<FileHandle> {
        FileHandle::open(self.device.clone())
    }
}

impl Drop for GpioDriver {
    fn drop(&mut self) {
        if !self.releases.is_empty() {
            warn!(id = %self.id, "Driver dropped without unload; releasing resources");
            self.releases.discharge();
        }
    }
}

impl fmt::Debug for GpioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioDriver")
            .field("id", &self.id)
            .field("node_path", &self.node_path)
            .field("pending", &self.releases.labels())
            .finish()
    }
}

/// Loader status of a load attempt: 0 on success, negative errno otherwise.
pub fn load_status(result: &Result<GpioDriver>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{HostOp, PinEvent, SimHost};
    use crate::identity::DeviceNumbering;
    use crate::pin::Level;
    use tracing_test::traced_test;

    fn host(sim: &SimHost) -> Arc<dyn Host> {
        Arc::new(sim.clone())
    }

    #[test]
    fn test_step_names_parse() {
        for step in LoadStep::ALL {
            assert_eq!(step.label().parse::<LoadStep>().unwrap(), step);
        }
        assert_eq!("claim-pin".parse::<LoadStep>().unwrap(), LoadStep::ClaimPin);
        assert!("bogus".parse::<LoadStep>().is_err());
    }

    #[test]
    fn test_load_records_every_release() {
        let sim = SimHost::new();
        let driver = GpioDriver::load(host(&sim), &DriverConfig::default()).unwrap();
        assert_eq!(
            driver.pending_releases(),
            vec![
                "reserve_number",
                "register_cdev",
                "create_class",
                "create_node",
                "allocate_buffer",
                "claim_pin",
            ]
        );
        assert!(driver.device().is_ready());

        driver.unload();
        assert!(sim.snapshot().is_clean());
    }

    #[test]
    fn test_configure_failure_releases_claim() {
        let sim = SimHost::new();
        sim.inject(HostOp::GpioDirectionOutput);

        let result = GpioDriver::load(host(&sim), &DriverConfig::default());
        assert!(matches!(result, Err(DriverError::PinConfig { gpio: 533, .. })));
        assert_eq!(
            sim.pin_events(533),
            vec![PinEvent::Requested("rpi-gpio-21".into()), PinEvent::Freed]
        );
        assert!(sim.snapshot().is_clean());
    }

    #[test]
    fn test_invalid_config_acquires_nothing() {
        let sim = SimHost::new();
        let config = DriverConfig {
            buffer_size: 0,
            ..DriverConfig::default()
        };
        let result = GpioDriver::load(host(&sim), &config);
        assert_eq!(load_status(&result), -22);
        assert!(sim.snapshot().is_clean());
    }

    #[test]
    #[traced_test]
    fn test_drop_without_unload_still_releases() {
        let sim = SimHost::new();
        let config = DriverConfig {
            numbering: DeviceNumbering::fixed(),
            ..DriverConfig::default()
        };
        {
            let driver = GpioDriver::load(host(&sim), &config).unwrap();
            let mut file = driver.open().unwrap();
            file.write_all(b"1").unwrap();
            assert_eq!(sim.pin_level(533), Some(Level::High));
        }
        assert_eq!(sim.pin_level(533), Some(Level::Low));
        assert!(sim.snapshot().is_clean());
        assert!(logs_contain("dropped without unload"));
    }
}
