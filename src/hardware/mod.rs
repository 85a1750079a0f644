//! Hardware layer: the blocking driver interface and a simulated sensor.

pub mod driver;
pub mod simulated;

pub use driver::{DeviceCommand, DeviceHandle, LedColor, ReferenceVectorMode, TssDriver};
pub use simulated::SimulatedTss;
