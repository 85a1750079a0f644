//! Axis configuration parsing.
//!
//! The sensor can reorder and negate its output axes to match how it is
//! mounted. Configuration names an axis order (`xyz`, `xzy`, `yxz`, `yzx`,
//! `zxy`, `zyx`, case-insensitive) and three independent inversion flags.
//!
//! The sensor's native "up" axis is Y. After reordering, the configured up
//! axis is the output slot native Y lands in, negated when that output axis
//! is inverted.

use crate::error::{ImuError, Result};
use crate::reading::Vector3;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Index of the sensor's native up axis (Y).
const NATIVE_UP_AXIS: usize = 1;

/// Output axis order, one of the six permutations of the native axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisOrder {
    /// Native order
    Xyz,
    /// Swap Y and Z
    Xzy,
    /// Swap X and Y
    Yxz,
    /// Output X, Y, Z from native Y, Z, X
    Yzx,
    /// Output X, Y, Z from native Z, X, Y
    Zxy,
    /// Swap X and Z
    Zyx,
}

impl AxisOrder {
    /// Every supported order, in device index order.
    pub const ALL: [AxisOrder; 6] = [
        AxisOrder::Xyz,
        AxisOrder::Xzy,
        AxisOrder::Yxz,
        AxisOrder::Yzx,
        AxisOrder::Zxy,
        AxisOrder::Zyx,
    ];

    /// Configuration name of this order.
    pub fn name(self) -> &'static str {
        match self {
            AxisOrder::Xyz => "xyz",
            AxisOrder::Xzy => "xzy",
            AxisOrder::Yxz => "yxz",
            AxisOrder::Yzx => "yzx",
            AxisOrder::Zxy => "zxy",
            AxisOrder::Zyx => "zyx",
        }
    }

    /// Index used by the device's axis-direction byte (bits 0-2).
    pub fn index(self) -> u8 {
        match self {
            AxisOrder::Xyz => 0,
            AxisOrder::Xzy => 1,
            AxisOrder::Yxz => 2,
            AxisOrder::Yzx => 3,
            AxisOrder::Zxy => 4,
            AxisOrder::Zyx => 5,
        }
    }

    /// Native axis index feeding each output axis.
    pub fn permutation(self) -> [usize; 3] {
        match self {
            AxisOrder::Xyz => [0, 1, 2],
            AxisOrder::Xzy => [0, 2, 1],
            AxisOrder::Yxz => [1, 0, 2],
            AxisOrder::Yzx => [1, 2, 0],
            AxisOrder::Zxy => [2, 0, 1],
            AxisOrder::Zyx => [2, 1, 0],
        }
    }
}

impl FromStr for AxisOrder {
    type Err = ImuError;

    fn from_str(name: &str) -> Result<Self> {
        AxisOrder::ALL
            .into_iter()
            .find(|order| order.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                ImuError::invalid(format!(
                    "unrecognized axis configuration '{}'. Must be one of: xyz, xzy, yxz, yzx, zxy, zyx",
                    name
                ))
            })
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis order plus per-axis inversion, applied to raw sensor axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisConfiguration {
    /// Which native axis feeds each output axis
    pub order: AxisOrder,
    /// Negate output X
    pub invert_x: bool,
    /// Negate output Y
    pub invert_y: bool,
    /// Negate output Z
    pub invert_z: bool,
}

impl AxisConfiguration {
    /// Configuration with the given order and no inversion.
    pub const fn new(order: AxisOrder) -> Self {
        Self {
            order,
            invert_x: false,
            invert_y: false,
            invert_z: false,
        }
    }

    /// Parse an axis order name into a configuration without inversion.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`] for unrecognized names.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map(Self::new)
    }

    /// Set the inversion flags.
    pub fn with_inversion(mut self, invert_x: bool, invert_y: bool, invert_z: bool) -> Self {
        self.invert_x = invert_x;
        self.invert_y = invert_y;
        self.invert_z = invert_z;
        self
    }

    /// Whether the given output axis (0 = x, 1 = y, 2 = z) is negated.
    pub fn is_inverted(&self, axis: usize) -> bool {
        match axis {
            0 => self.invert_x,
            1 => self.invert_y,
            _ => self.invert_z,
        }
    }

    /// Device encoding: bits 0-2 order, bit 4 negate Z, bit 5 negate Y, bit 6 negate X.
    pub fn to_device_byte(&self) -> u8 {
        let mut byte = self.order.index();
        if self.invert_z {
            byte |= 1 << 4;
        }
        if self.invert_y {
            byte |= 1 << 5;
        }
        if self.invert_x {
            byte |= 1 << 6;
        }
        byte
    }

    /// Signed permutation matrix taking native-frame vectors to the configured frame.
    ///
    /// Row `axis` has a single ±1 in the column of the native axis that feeds it.
    pub fn matrix(&self) -> Matrix3<f64> {
        let mut m = Matrix3::zeros();
        for (axis, source) in self.order.permutation().into_iter().enumerate() {
            m[(axis, source)] = if self.is_inverted(axis) { -1.0 } else { 1.0 };
        }
        m
    }

    /// Map a vector from the sensor's native frame into the configured frame.
    pub fn apply(&self, native: Vector3) -> Vector3 {
        self.matrix() * native
    }

    /// Unit vector pointing up in the configured frame.
    pub fn up_vector(&self) -> Vector3 {
        self.matrix().column(NATIVE_UP_AXIS).into_owned()
    }

    /// Unit vector pointing down in the configured frame.
    pub fn down_vector(&self) -> Vector3 {
        -self.up_vector()
    }
}

impl Default for AxisConfiguration {
    fn default() -> Self {
        Self::new(AxisOrder::Xyz)
    }
}

impl fmt::Display for AxisConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.order)?;
        for (flag, label) in [
            (self.invert_x, " -x"),
            (self.invert_y, " -y"),
            (self.invert_z, " -z"),
        ] {
            if flag {
                f.write_str(label)?;
            }
        }
        Ok(())
    }
}
