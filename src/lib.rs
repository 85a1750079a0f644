//! # tss_imu
//!
//! Session core for a YEI 3-Space USB inertial sensor: owns the device
//! connection, samples it at a fixed rate, publishes gravity-compensated
//! readings, executes one-shot device commands and reports health.
//!
//! ## Crate Structure
//!
//! - **`axis`**: `AxisOrder` / `AxisConfiguration`, parsed from names such as
//!   `"zxy"` plus three inversion flags.
//! - **`hardware`**: the blocking `TssDriver` interface and a simulated sensor.
//! - **`session`**: `DeviceSession`, the open/closed lifecycle and the single
//!   exclusive access gate every device transaction goes through.
//! - **`polling`**: the fixed-rate polling task, reconnect policy and gravity
//!   compensation.
//! - **`commands`**: `CommandDispatcher` for tare, commit, reset, factory reset,
//!   multi-reference and LED color.
//! - **`diagnostics`**: failure counters plus OK/WARN/ERROR rate classification.
//! - **`reading`**: `SensorReading` and the vector/quaternion types it carries.
//! - **`node`**: `TssImu`, which assembles all of the above from an `ImuConfig`.
//! - **`config`**: Figment-layered configuration (defaults, TOML, environment).
//! - **`error`**: the crate-wide `ImuError`.
//! - **`logging`**: `tracing-subscriber` setup.

pub mod axis;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod node;
pub mod polling;
pub mod reading;
pub mod session;

pub use axis::{AxisConfiguration, AxisOrder};
pub use commands::{CommandDispatcher, CommandKind, CommandRequest};
pub use config::ImuConfig;
pub use diagnostics::{DiagnosticLevel, DiagnosticReport, DiagnosticsAggregator};
pub use error::{ImuError, Result};
pub use node::TssImu;
pub use reading::SensorReading;
pub use session::DeviceSession;
