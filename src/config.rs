//! Load-time configuration.
//!
//! Configuration is layered with `figment`:
//! 1. Built-in defaults (dynamic numbering, `/dev/gpio_device`, GPIO 21)
//! 2. An optional TOML file (`config/gpio_chardev.toml` by default)
//! 3. Environment variables prefixed `GPIO_CHARDEV_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use gpio_chardev::config::DriverConfig;
//!
//! let config = DriverConfig::load()?;
//! config.validate()?;
//! println!("Device: /dev/{}", config.device_name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Example override: `GPIO_CHARDEV_GPIO__PIN=17`.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::buffer::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::error::{DriverError, Result};
use crate::identity::{DevId, DeviceNumbering, MAX_MAJOR, MAX_MINOR};
use crate::pin::{DEFAULT_OFFSET, DEFAULT_PIN};
use crate::registrar::DEFAULT_CLASS_NAME;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gpio_chardev.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GPIO_CHARDEV_";

/// Default device node name.
pub const DEFAULT_DEVICE_NAME: &str = "gpio_device";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Device node name (the node appears as `/dev/<device_name>`)
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Class grouping the node is published in
    #[serde(default = "default_class_name")]
    pub class_name: String,
    /// Buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Device-number assignment
    #[serde(default)]
    pub numbering: DeviceNumbering,
    /// Output line
    #[serde(default)]
    pub gpio: GpioConfig,
}

/// Output line selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioConfig {
    /// Pin number relative to the chip base
    #[serde(default = "default_pin")]
    pub pin: u32,
    /// Chip base in the global GPIO numbering
    #[serde(default = "default_offset")]
    pub offset: u32,
    /// Label the line is claimed under
    #[serde(default = "default_label")]
    pub label: String,
}

// Default value functions
fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_class_name() -> String {
    DEFAULT_CLASS_NAME.to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pin() -> u32 {
    DEFAULT_PIN
}

fn default_offset() -> u32 {
    DEFAULT_OFFSET
}

fn default_label() -> String {
    format!("rpi-gpio-{DEFAULT_PIN}")
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pin: default_pin(),
            offset: default_offset(),
            label: default_label(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            class_name: default_class_name(),
            buffer_size: default_buffer_size(),
            log_level: default_log_level(),
            numbering: DeviceNumbering::default(),
            gpio: GpioConfig::default(),
        }
    }
}

impl GpioConfig {
    /// Global line number (`offset + pin`).
    pub fn line(&self) -> u32 {
        self.offset + self.pin
    }
}

impl DriverConfig {
    /// Load from the default file (if present) and the environment.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file (if present) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Check semantic constraints the types cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(invalid("device_name must not be empty"));
        }
        if self.device_name.contains('/') {
            return Err(invalid(format!(
                "device_name '{}' must not contain '/'",
                self.device_name
            )));
        }
        if self.class_name.is_empty() {
            return Err(invalid("class_name must not be empty"));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_CAPACITY {
            return Err(invalid(format!(
                "buffer_size {} must be between 1 and {MAX_CAPACITY}",
                self.buffer_size
            )));
        }
        if let DeviceNumbering::Static { major, minor } = self.numbering {
            if major == 0 {
                return Err(invalid("static major must be non-zero"));
            }
            if !DevId::new(major, minor).is_representable() {
                return Err(invalid(format!(
                    "static device number {major}:{minor} out of range (major <= {MAX_MAJOR}, minor <= {MAX_MINOR})"
                )));
            }
        }
        if self.gpio.offset.checked_add(self.gpio.pin).is_none() {
            return Err(invalid("gpio offset + pin overflows"));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn invalid(message: impl Into<String>) -> DriverError {
    DriverError::InvalidConfig {
        message: message.into(),
    }
}
