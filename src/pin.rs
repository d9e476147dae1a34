//! Single GPIO output line.
//!
//! A [`PinClaim`] is the driver's exclusive reservation of one line. It is
//! created by [`PinClaim::claim`], must be configured as an output before
//! its level can be driven, and is handed back with [`PinClaim::release`],
//! which consumes it so a released claim cannot be reached again.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{DriverError, Result};
use crate::host::GpioChip;

/// Pin number on the header used by default.
pub const DEFAULT_PIN: u32 = 21;

/// Base of the GPIO chip in the global numbering space.
pub const DEFAULT_OFFSET: u32 = 512;

/// Logic level of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Line driven to 0
    #[default]
    Low,
    /// Line driven to 1
    High,
}

impl Level {
    /// Decode an ASCII command byte: `'0'` is low, `'1'` is high.
    pub fn from_command(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Low),
            b'1' => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Configured direction of a claimed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Driven by the driver
    Output,
}

/// Exclusive claim on one GPIO line.
#[derive(Debug, PartialEq, Eq)]
pub struct PinClaim {
    pin: u32,
    offset: u32,
    direction: Option<Direction>,
    level: Option<Level>,
}

impl PinClaim {
    /// Claim line `offset + pin` under `label`.
    pub fn claim<H>(host: &H, pin: u32, offset: u32, label: &str) -> Result<Self>
    where
        H: GpioChip + ?Sized,
    {
        let gpio = offset + pin;
        host.gpio_request(gpio, label).map_err(|source| {
            error!(gpio, label, %source, "can not request gpio");
            DriverError::PinUnavailable { gpio, source }
        })?;

        info!(gpio, pin, label, "Claimed GPIO line");
        Ok(Self {
            pin,
            offset,
            direction: None,
            level: None,
        })
    }

    /// Global line number.
    pub fn gpio(&self) -> u32 {
        self.offset + self.pin
    }

    /// Pin number relative to the chip base.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Chip base offset.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Configured direction, if any.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Level last driven by this claim.
    pub fn level(&self) -> Option<Level> {
        self.level
    }

    /// Configure the line as an output, initially low.
    pub fn configure_output<H>(&mut self, host: &H) -> Result<()>
    where
        H: GpioChip + ?Sized,
    {
        let gpio = self.gpio();
        host.gpio_direction_output(gpio, Level::Low)
            .map_err(|source| {
                error!(gpio, %source, "can not set the gpio as output");
                DriverError::PinConfig { gpio, source }
            })?;

        self.direction = Some(Direction::Output);
        self.level = Some(Level::Low);
        debug!(gpio, "Configured GPIO as output");
        Ok(())
    }

    /// Drive the line. Only valid once configured as an output.
    pub fn set_level<H>(&mut self, host: &H, level: Level) -> Result<()>
    where
        H: GpioChip + ?Sized,
    {
        if self.direction != Some(Direction::Output) {
            warn!(gpio = self.gpio(), "set_level before output configuration");
            return Err(DriverError::NotReady);
        }
        host.gpio_set_value(self.gpio(), level);
        self.level = Some(level);
        debug!(gpio = self.gpio(), %level, "Set GPIO level");
        Ok(())
    }

    /// Return the line to the host.
    ///
    /// A configured output is driven low first so the line is left in a
    /// safe state.
    pub fn release<H>(self, host: &H)
    where
        H: GpioChip + ?Sized,
    {
        let gpio = self.gpio();
        if self.direction == Some(Direction::Output) {
            host.gpio_set_value(gpio, Level::Low);
            debug!(gpio, "Drove GPIO low before release");
        }
        host.gpio_free(gpio);
        info!(gpio, "Released GPIO line");
    }
}
