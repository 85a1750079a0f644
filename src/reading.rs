//! Sensor reading types.
//!
//! A [`SensorReading`] is produced once per polling tick and handed to the
//! broadcast channel; the session keeps no history of its own.

use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Gravitational acceleration along the "down" axis, in m/s².
///
/// Negative because gravity points down; multiplying the configured down
/// vector by this constant yields what an accelerometer at rest measures.
pub const GRAVITATIONAL_ACCELERATION: f64 = -STANDARD_GRAVITY;

/// Cartesian 3-vector in the configured sensor frame.
pub type Vector3 = nalgebra::Vector3<f64>;

/// Unit orientation quaternion.
pub type Orientation = UnitQuaternion<f64>;

/// 3x3 covariance matrix.
pub type Covariance = Matrix3<f64>;

/// Build a covariance matrix with `variance` on the diagonal.
pub fn diagonal_covariance(variance: f64) -> Covariance {
    Matrix3::from_diagonal_element(variance)
}

/// One transaction's worth of raw values, as returned by the driver.
///
/// Acceleration is in g, angular velocity in rad/s, temperature in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Filtered orientation
    pub orientation: Orientation,
    /// Gyroscope rates
    pub angular_velocity: Vector3,
    /// Accelerometer, gravity included
    pub acceleration_g: Vector3,
    /// Compass, gauss
    pub magnetic_field: Vector3,
    /// Internal temperature
    pub temperature: f64,
}

/// Fixed uncertainty scalars attached verbatim to every reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingCovariances {
    /// Orientation covariance diagonal
    pub orientation: f64,
    /// Angular velocity covariance diagonal
    pub angular_velocity: f64,
    /// Linear acceleration covariance diagonal
    pub linear_acceleration: f64,
    /// Magnetic field covariance diagonal
    pub magnetic_field: f64,
    /// Temperature variance
    pub temperature_variance: f64,
}

/// A single published sample from the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Frame the vectors are expressed in
    pub frame_id: String,
    /// Wall-clock time the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Filtered orientation
    pub orientation: Orientation,
    /// Diagonal 3x3
    pub orientation_covariance: Covariance,
    /// rad/s
    pub angular_velocity: Vector3,
    /// Diagonal 3x3
    pub angular_velocity_covariance: Covariance,
    /// m/s², gravity removed
    pub linear_acceleration: Vector3,
    /// Diagonal 3x3
    pub linear_acceleration_covariance: Covariance,
    /// Gauss
    pub magnetic_field: Vector3,
    /// Diagonal 3x3
    pub magnetic_field_covariance: Covariance,
    /// °C
    pub temperature: f64,
    /// Variance of `temperature`
    pub temperature_variance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Unit;

    #[test]
    fn diagonal_covariance_layout() {
        let cov = diagonal_covariance(0.5);
        assert_eq!(cov.diagonal(), Vector3::new(0.5, 0.5, 0.5));
        assert_eq!(cov[(0, 1)], 0.0);
        assert_eq!(cov[4], 0.5);
    }

    #[test]
    fn reading_serializes_to_json() {
        let up = Unit::new_normalize(Vector3::y());
        let reading = SensorReading {
            frame_id: "imu_link".into(),
            timestamp: Utc::now(),
            orientation: Orientation::from_axis_angle(&up, 0.3),
            orientation_covariance: diagonal_covariance(0.01),
            angular_velocity: Vector3::zeros(),
            angular_velocity_covariance: diagonal_covariance(0.0),
            linear_acceleration: Vector3::new(0.0, 0.1, 0.0),
            linear_acceleration_covariance: diagonal_covariance(0.0),
            magnetic_field: Vector3::new(0.2, -0.4, 0.05),
            magnetic_field_covariance: diagonal_covariance(0.0),
            temperature: 25.0,
            temperature_variance: 0.0,
        };
        let json = serde_json::to_string(&reading).unwrap();
        let back: SensorReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frame_id, "imu_link");
        assert!((back.orientation.angle() - 0.3).abs() < 1e-9);
        assert_eq!(back.magnetic_field, reading.magnetic_field);
    }
}
