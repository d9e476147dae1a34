//! Character-device registration and device-node publication.
//!
//! Registration binds a device number to the driver's operation table.
//! Publication makes the device visible: a class grouping first, then the
//! openable node inside it. Teardown runs the other way round: node, class,
//! then the registration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::dispatch::FileOperations;
use crate::error::{DriverError, Result};
use crate::host::{CharDeviceTable, DeviceClasses};
use crate::identity::DevId;

/// Default class grouping name.
pub const DEFAULT_CLASS_NAME: &str = "new_class";

/// Binding of a device number to an operation table.
#[derive(Debug, PartialEq, Eq)]
pub struct CdevRegistration {
    id: DevId,
}

impl CdevRegistration {
    /// Bind `ops` to `id`.
    pub fn register<H>(host: &H, id: DevId, ops: Arc<dyn FileOperations>) -> Result<Self>
    where
        H: CharDeviceTable + ?Sized,
    {
        host.cdev_add(id, ops).map_err(|source| {
            error!(%id, %source, "unable to add cdev");
            DriverError::Registration { id, source }
        })?;
        info!(%id, "Registered character device");
        Ok(Self { id })
    }

    /// Bound device number.
    pub fn id(&self) -> DevId {
        self.id
    }

    /// Remove the binding.
    pub fn unregister<H>(self, host: &H)
    where
        H: CharDeviceTable + ?Sized,
    {
        debug!(id = %self.id, "Removing character device");
        host.cdev_del(self.id);
    }
}

/// Visible class grouping.
#[derive(Debug, PartialEq, Eq)]
pub struct ClassEntry {
    name: String,
}

impl ClassEntry {
    /// Create the class grouping `name`.
    pub fn create<H>(host: &H, name: &str) -> Result<Self>
    where
        H: DeviceClasses + ?Sized,
    {
        host.class_create(name).map_err(|source| {
            error!(class = name, %source, "unable to create the class");
            DriverError::Publication {
                name: name.to_string(),
                source,
            }
        })?;
        info!(class = name, "Created device class");
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destroy the grouping. Its device files must be gone already.
    pub fn destroy<H>(self, host: &H)
    where
        H: DeviceClasses + ?Sized,
    {
        debug!(class = %self.name, "Destroying device class");
        host.class_destroy(&self.name);
    }
}

/// Openable device node inside a class.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceFile {
    class: String,
    id: DevId,
    path: PathBuf,
}

impl DeviceFile {
    /// Publish node `name` for `id` inside the class named `class`.
    pub fn create<H>(host: &H, class: &str, id: DevId, name: &str) -> Result<Self>
    where
        H: DeviceClasses + ?Sized,
    {
        let path = host.device_create(class, id, name).map_err(|source| {
            error!(class, device = name, %source, "unable to create the device");
            DriverError::Publication {
                name: name.to_string(),
                source,
            }
        })?;
        info!(path = %path.display(), %id, "Published device node");
        Ok(Self {
            class: class.to_string(),
            id,
            path,
        })
    }

    /// Node path, e.g. `/dev/gpio_device`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the node.
    pub fn destroy<H>(self, host: &H)
    where
        H: DeviceClasses + ?Sized,
    {
        debug!(path = %self.path.display(), "Removing device node");
        host.device_destroy(&self.class, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::GpioDevice;
    use crate::host::sim::{HostOp, SimHost};
    use crate::host::Host;

    fn ops(host: &SimHost) -> Arc<dyn FileOperations> {
        let host: Arc<dyn Host> = Arc::new(host.clone());
        Arc::new(GpioDevice::new(host))
    }

    #[test]
    fn test_register_twice_fails() {
        let host = SimHost::new();
        let id = DevId::new(240, 0);
        let first = CdevRegistration::register(&host, id, ops(&host)).unwrap();

        let err = CdevRegistration::register(&host, id, ops(&host)).unwrap_err();
        assert!(matches!(err, DriverError::Registration { .. }));

        first.unregister(&host);
        assert!(host.snapshot().bound_cdevs.is_empty());
    }

    #[test]
    fn test_publish_and_unpublish_in_order() {
        let host = SimHost::new();
        let id = DevId::new(240, 0);
        let class = ClassEntry::create(&host, DEFAULT_CLASS_NAME).unwrap();
        let file = DeviceFile::create(&host, class.name(), id, "gpio_device").unwrap();
        assert_eq!(file.path(), Path::new("/dev/gpio_device"));
        assert!(host.node_exists("/dev/gpio_device"));

        file.destroy(&host);
        class.destroy(&host);
        let snapshot = host.snapshot();
        assert!(snapshot.classes.is_empty());
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn test_class_failure_reports_publication_error() {
        let host = SimHost::new();
        host.inject(HostOp::ClassCreate);
        let err = ClassEntry::create(&host, DEFAULT_CLASS_NAME).unwrap_err();
        assert!(matches!(err, DriverError::Publication { .. }));
    }
}
