//! Low-level driver interface.
//!
//! The wire protocol of the sensor lives behind [`TssDriver`]. Implementations
//! are blocking: every call may wait on the USB transport and is expected to
//! carry its own timeout. The session serializes all calls made against one
//! [`DeviceHandle`], so implementations never see overlapping transactions on
//! the same handle.

use crate::axis::AxisConfiguration;
use crate::error::{ImuError, Result as ImuResult};
use crate::reading::{Orientation, Vector3};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque token for one open device connection.
///
/// Not `Clone`: the session owns the only copy and gives it back to
/// [`TssDriver::close`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    id: u64,
}

impl DeviceHandle {
    /// Wrap a driver-specific handle value (file descriptor, slot index, ...).
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Driver-specific handle value.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// How the sensor maintains its gravity/north reference vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceVectorMode {
    /// Reference vectors are fixed at their stored values
    SingleStatic,
    /// Reference vectors are measured once when the device starts
    #[default]
    SingleAuto,
    /// Reference vectors are continuously re-measured
    SingleAutoContinuous,
    /// Several reference vectors are blended by orientation
    Multi,
}

impl ReferenceVectorMode {
    /// Device mode code.
    pub fn code(self) -> u8 {
        match self {
            ReferenceVectorMode::SingleStatic => 0,
            ReferenceVectorMode::SingleAuto => 1,
            ReferenceVectorMode::SingleAutoContinuous => 2,
            ReferenceVectorMode::Multi => 3,
        }
    }
}

/// RGB indicator color, each component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedColor {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
}

impl LedColor {
    /// Create a color without validating it.
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Check that every component is finite and within `[0, 1]`.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`] naming the offending channel.
    pub fn validate(&self) -> ImuResult<()> {
        for (channel, value) in [("r", self.r), ("g", self.g), ("b", self.b)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ImuError::invalid(format!(
                    "LED color channel {} = {} out of range (0.0-1.0)",
                    channel, value
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for LedColor {
    type Err = ImuError;

    /// Parse three whitespace-separated components, e.g. `"1 0 0.5"`.
    fn from_str(s: &str) -> ImuResult<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [r, g, b] = parts.as_slice() else {
            return Err(ImuError::invalid(format!(
                "LED color needs 3 components, got {}",
                parts.len()
            )));
        };
        let parse = |text: &str| {
            text.parse::<f32>()
                .map_err(|_| ImuError::invalid(format!("LED color component '{}' is not a number", text)))
        };
        let color = LedColor::new(parse(r)?, parse(g)?, parse(b)?);
        color.validate()?;
        Ok(color)
    }
}

/// One-shot device command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// Take the current orientation as the zero orientation
    Tare,
    /// Persist current settings to non-volatile memory
    Commit,
    /// Soft-reset the device
    Reset,
    /// Restore factory settings
    FactoryReset,
    /// Capture multi-reference vectors at the current orientation
    MultiReference,
    /// Set the indicator LED color
    SetLedColor(LedColor),
}

impl DeviceCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::Tare => "tare",
            DeviceCommand::Commit => "commit",
            DeviceCommand::Reset => "reset",
            DeviceCommand::FactoryReset => "factory-reset",
            DeviceCommand::MultiReference => "multi-reference",
            DeviceCommand::SetLedColor(_) => "led-color",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Blocking primitives of the sensor's USB driver.
///
/// # Contract
/// - `open` establishes a connection and returns a fresh handle; it is called
///   at most once per open attempt.
/// - `close` consumes the handle; it is called exactly once per successful `open`.
/// - Readers return values in the configured axis frame: orientation as a unit
///   quaternion, angular velocity in rad/s, acceleration in g, magnetic field
///   in gauss, temperature in °C.
/// - Any call may fail; failures are reported, never panicked.
pub trait TssDriver: Send + Sync {
    /// Connect to the device at `port`.
    fn open(&self, port: &str) -> Result<DeviceHandle>;

    /// Release the connection.
    fn close(&self, handle: DeviceHandle) -> Result<()>;

    /// Read the filtered orientation.
    fn read_orientation(&self, handle: &DeviceHandle) -> Result<Orientation>;

    /// Read corrected gyroscope rates.
    fn read_gyro(&self, handle: &DeviceHandle) -> Result<Vector3>;

    /// Read corrected accelerometer values.
    fn read_accel(&self, handle: &DeviceHandle) -> Result<Vector3>;

    /// Read corrected compass values.
    fn read_compass(&self, handle: &DeviceHandle) -> Result<Vector3>;

    /// Read the internal temperature.
    fn read_temperature(&self, handle: &DeviceHandle) -> Result<f64>;

    /// Issue a one-shot command.
    fn send_command(&self, handle: &DeviceHandle, command: &DeviceCommand) -> Result<()>;

    /// Apply the axis order and inversion.
    fn set_axis_config(&self, handle: &DeviceHandle, axes: AxisConfiguration) -> Result<()>;

    /// Select how reference vectors are maintained.
    fn set_reference_vector_mode(
        &self,
        handle: &DeviceHandle,
        mode: ReferenceVectorMode,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_color_validation() {
        assert!(LedColor::new(0.0, 0.5, 1.0).validate().is_ok());
        assert!(LedColor::new(1.5, 0.0, 0.0).validate().is_err());
        assert!(LedColor::new(0.0, -0.1, 0.0).validate().is_err());
        assert!(LedColor::new(0.0, 0.0, f32::NAN).validate().is_err());
    }

    #[test]
    fn led_color_from_str() {
        assert_eq!("1 0 0.5".parse::<LedColor>().unwrap(), LedColor::new(1.0, 0.0, 0.5));
        assert!("1 0".parse::<LedColor>().is_err());
        assert!("1 0 red".parse::<LedColor>().is_err());
        assert!("2 0 0".parse::<LedColor>().is_err());
    }

    #[test]
    fn reference_mode_codes() {
        assert_eq!(ReferenceVectorMode::SingleStatic.code(), 0);
        assert_eq!(ReferenceVectorMode::default(), ReferenceVectorMode::SingleAuto);
        assert_eq!(ReferenceVectorMode::Multi.code(), 3);
    }
}
