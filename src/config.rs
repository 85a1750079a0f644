//! Sensor node configuration using Figment.
//!
//! Configuration is layered:
//! 1. Built-in defaults ([`ImuConfig::default`])
//! 2. A TOML file (default `config/tss_imu.toml`, optional)
//! 3. Environment variables prefixed with `TSS_IMU_`
//!
//! # Example
//! ```no_run
//! use tss_imu::config::ImuConfig;
//!
//! let config = ImuConfig::load()?;
//! config.validate()?;
//! println!("Sampling {} at {} Hz", config.port, config.frequency);
//! # Ok::<(), tss_imu::error::ImuError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::axis::AxisConfiguration;
use crate::diagnostics::FrequencyBounds;
use crate::error::{ImuError, Result};
use crate::hardware::driver::ReferenceVectorMode;
use crate::polling::PollingConfig;
use crate::reading::ReadingCovariances;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/tss_imu.toml";

/// Default polling rate in Hz.
const DEFAULT_FREQUENCY: f64 = 100.0;

/// Tick period for `frequency`, or `None` if it is not a usable timer period.
fn checked_period(frequency: f64) -> Option<Duration> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frequency)
        .ok()
        .filter(|period| !period.is_zero())
}
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TSS_IMU_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Everything needed to run one sensor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Device port path
    pub port: String,
    /// Frame id stamped on readings
    pub frame_id: String,
    /// Polling and publish rate in Hz
    pub frequency: f64,
    /// Axis order name (xyz, xzy, yxz, yzx, zxy, zyx)
    pub axis_config: String,
    /// Negate output X
    pub invert_x_axis: bool,
    /// Negate output Y
    pub invert_y_axis: bool,
    /// Negate output Z
    pub invert_z_axis: bool,
    /// Reference vector mode pushed on open
    pub reference_vector_mode: ReferenceVectorMode,
    /// Diagonal of the orientation covariance
    pub orientation_covariance: f64,
    /// Diagonal of the angular velocity covariance
    pub angular_velocity_covariance: f64,
    /// Diagonal of the linear acceleration covariance
    pub linear_acceleration_covariance: f64,
    /// Diagonal of the magnetic field covariance
    pub magnetic_field_covariance: f64,
    /// Temperature variance
    pub temperature_variance: f64,
    /// Lowest acceptable observed rate; defaults to `frequency`
    pub min_update_rate: Option<f64>,
    /// Highest acceptable observed rate; defaults to `frequency`
    pub max_update_rate: Option<f64>,
    /// Fractional slack on the rate bounds
    pub frequency_tolerance: f64,
    /// Sliding window for the rate estimate
    pub frequency_window_ms: u64,
    /// Consecutive read failures before reconnecting
    pub reconnect_threshold: u32,
    /// Reading broadcast buffer
    pub channel_capacity: usize,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            frame_id: "imu_link".to_string(),
            frequency: DEFAULT_FREQUENCY,
            axis_config: "xyz".to_string(),
            invert_x_axis: false,
            invert_y_axis: false,
            invert_z_axis: false,
            reference_vector_mode: ReferenceVectorMode::default(),
            orientation_covariance: 0.0,
            angular_velocity_covariance: 0.0,
            linear_acceleration_covariance: 0.0,
            magnetic_field_covariance: 0.0,
            temperature_variance: 0.0,
            min_update_rate: None,
            max_update_rate: None,
            frequency_tolerance: 0.1,
            frequency_window_ms: 1000,
            reconnect_threshold: 3,
            channel_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl ImuConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// Environment variables override the file, e.g. `TSS_IMU_FREQUENCY=50`.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Layered provider, exposed so callers can merge further sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(ImuConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Validate configuration after loading.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if checked_period(self.frequency).is_none() {
            return Err(ImuError::invalid(format!(
                "frequency must be a positive number of Hz with a representable period, got {}",
                self.frequency
            )));
        }

        self.axis_configuration()?;

        let bounds = self.frequency_bounds();
        for (name, rate) in [
            ("min_update_rate", bounds.min_update_rate),
            ("max_update_rate", bounds.max_update_rate),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ImuError::invalid(format!("{} must be >= 0, got {}", name, rate)));
            }
        }
        if bounds.min_update_rate > bounds.max_update_rate {
            return Err(ImuError::invalid(format!(
                "min_update_rate {} exceeds max_update_rate {}",
                bounds.min_update_rate, bounds.max_update_rate
            )));
        }
        if !(0.0..1.0).contains(&self.frequency_tolerance) {
            return Err(ImuError::invalid(format!(
                "frequency_tolerance must be in [0, 1), got {}",
                self.frequency_tolerance
            )));
        }

        for (name, value) in [
            ("orientation_covariance", self.orientation_covariance),
            ("angular_velocity_covariance", self.angular_velocity_covariance),
            ("linear_acceleration_covariance", self.linear_acceleration_covariance),
            ("magnetic_field_covariance", self.magnetic_field_covariance),
            ("temperature_variance", self.temperature_variance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ImuError::invalid(format!("{} must be >= 0, got {}", name, value)));
            }
        }

        if self.reconnect_threshold == 0 {
            return Err(ImuError::invalid("reconnect_threshold must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(ImuError::invalid("channel_capacity must be at least 1"));
        }
        if self.frequency_window_ms == 0 {
            return Err(ImuError::invalid("frequency_window_ms must be at least 1"));
        }
        if self.port.trim().is_empty() {
            return Err(ImuError::invalid("port must not be empty"));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ImuError::invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    /// Parsed axis order with the inversion flags applied.
    pub fn axis_configuration(&self) -> Result<AxisConfiguration> {
        Ok(AxisConfiguration::parse(&self.axis_config)?.with_inversion(
            self.invert_x_axis,
            self.invert_y_axis,
            self.invert_z_axis,
        ))
    }

    /// Tick period. Falls back to the default rate's period if `frequency`
    /// would not pass [`validate`](Self::validate).
    pub fn period(&self) -> Duration {
        checked_period(self.frequency)
            .or_else(|| checked_period(DEFAULT_FREQUENCY))
            .unwrap_or(Duration::from_millis(10))
    }

    /// Accepted rate band for diagnostics.
    pub fn frequency_bounds(&self) -> FrequencyBounds {
        FrequencyBounds::new(
            self.min_update_rate.unwrap_or(self.frequency),
            self.max_update_rate.unwrap_or(self.frequency),
        )
        .with_tolerance(self.frequency_tolerance)
    }

    /// Sliding window for the rate estimate.
    pub fn frequency_window(&self) -> Duration {
        Duration::from_millis(self.frequency_window_ms)
    }

    /// Uncertainty fields attached to readings.
    pub fn covariances(&self) -> ReadingCovariances {
        ReadingCovariances {
            orientation: self.orientation_covariance,
            angular_velocity: self.angular_velocity_covariance,
            linear_acceleration: self.linear_acceleration_covariance,
            magnetic_field: self.magnetic_field_covariance,
            temperature_variance: self.temperature_variance,
        }
    }

    /// Settings for the polling loop.
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            period: self.period(),
            reconnect_threshold: self.reconnect_threshold,
            frame_id: self.frame_id.clone(),
            covariances: self.covariances(),
        }
    }
}
