//! Simulated 3-Space sensor.
//!
//! Implements [`TssDriver`] without hardware so the session, polling loop and
//! command path can run end to end. The simulated device sits level and
//! slowly turns about its vertical axis; readings follow whatever axis
//! configuration was pushed to it.
//!
//! Faults can be injected at runtime (failed opens, failed reads, added
//! latency) and every open/close is counted so handle leaks are visible.

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::axis::AxisConfiguration;
use crate::hardware::driver::{
    DeviceCommand, DeviceHandle, LedColor, ReferenceVectorMode, TssDriver,
};
use crate::reading::{Orientation, Vector3};
use nalgebra::Unit;

/// Yaw advanced per orientation read, in radians.
const YAW_STEP: f64 = 0.002;

/// Earth field in the native frame, gauss.
const NATIVE_FIELD: [f64; 3] = [0.21, -0.42, 0.05];

/// Default indicator color after power-up.
const DEFAULT_LED: LedColor = LedColor::new(0.0, 0.0, 1.0);

struct SimulatedState {
    next_handle: u64,
    open_handles: HashSet<u64>,
    axes: AxisConfiguration,
    reference_mode: ReferenceVectorMode,
    led: LedColor,
    yaw: f64,
    commands: Vec<DeviceCommand>,
}

/// Simulated 3-Space USB sensor.
pub struct SimulatedTss {
    state: Mutex<SimulatedState>,
    fail_open: AtomicBool,
    fail_reads: AtomicBool,
    pending_read_failures: AtomicU32,
    read_latency_us: AtomicU64,
    open_calls: AtomicU64,
    close_calls: AtomicU64,
}

impl SimulatedTss {
    /// Create a healthy simulated sensor.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                next_handle: 1,
                open_handles: HashSet::new(),
                axes: AxisConfiguration::default(),
                reference_mode: ReferenceVectorMode::default(),
                led: DEFAULT_LED,
                yaw: 0.0,
                commands: Vec::new(),
            }),
            fail_open: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            pending_read_failures: AtomicU32::new(0),
            read_latency_us: AtomicU64::new(0),
            open_calls: AtomicU64::new(0),
            close_calls: AtomicU64::new(0),
        }
    }

    /// Make subsequent `open` calls fail (or succeed again).
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail exactly the next `count` reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.pending_read_failures.store(count, Ordering::SeqCst);
    }

    /// Delay added to every read.
    pub fn set_read_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.read_latency_us.store(micros, Ordering::SeqCst);
    }

    /// Number of successful `open` calls.
    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles.len()
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.state.lock().commands.clone()
    }

    /// Axis configuration last pushed to the device.
    pub fn axis_config(&self) -> AxisConfiguration {
        self.state.lock().axes
    }

    /// Reference vector mode last pushed to the device.
    pub fn reference_mode(&self) -> ReferenceVectorMode {
        self.state.lock().reference_mode
    }

    /// Current indicator color.
    pub fn led_color(&self) -> LedColor {
        self.state.lock().led
    }

    fn check_handle(&self, handle: &DeviceHandle) -> Result<()> {
        if self.state.lock().open_handles.contains(&handle.id()) {
            Ok(())
        } else {
            Err(anyhow!("stale device handle {}", handle.id()))
        }
    }

    /// Common entry for every read: handle check, injected faults, latency.
    fn begin_read(&self, handle: &DeviceHandle, what: &str) -> Result<()> {
        self.check_handle(handle)?;

        let latency = self.read_latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_micros(latency));
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("simulated {} read timeout", what);
        }
        let consumed = self
            .pending_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            bail!("simulated {} read timeout", what);
        }
        Ok(())
    }
}

impl Default for SimulatedTss {
    fn default() -> Self {
        Self::new()
    }
}

fn noise(scale: f64) -> f64 {
    rand::thread_rng().gen_range(-scale..scale)
}

fn noisy(v: Vector3, scale: f64) -> Vector3 {
    v + Vector3::from_fn(|_, _| noise(scale))
}

impl TssDriver for SimulatedTss {
    fn open(&self, port: &str) -> Result<DeviceHandle> {
        if self.fail_open.load(Ordering::SeqCst) {
            bail!("simulated device not present on {}", port);
        }
        let mut state = self.state.lock();
        let id = state.next_handle;
        state.next_handle += 1;
        state.open_handles.insert(id);
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(port, handle = id, "SimulatedTss: opened");
        Ok(DeviceHandle::new(id))
    }

    fn close(&self, handle: DeviceHandle) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.lock().open_handles.remove(&handle.id()) {
            bail!("closing unknown device handle {}", handle.id());
        }
        tracing::debug!(handle = handle.id(), "SimulatedTss: closed");
        Ok(())
    }

    fn read_orientation(&self, handle: &DeviceHandle) -> Result<Orientation> {
        self.begin_read(handle, "orientation")?;
        let mut state = self.state.lock();
        state.yaw += YAW_STEP;
        let up = Unit::new_normalize(state.axes.up_vector());
        Ok(Orientation::from_axis_angle(&up, state.yaw))
    }

    fn read_gyro(&self, handle: &DeviceHandle) -> Result<Vector3> {
        self.begin_read(handle, "gyro")?;
        let up = self.state.lock().axes.up_vector();
        Ok(noisy(up * YAW_STEP, 1e-4))
    }

    fn read_accel(&self, handle: &DeviceHandle) -> Result<Vector3> {
        self.begin_read(handle, "accel")?;
        // At rest the accelerometer reads +1 g along "up"
        let up = self.state.lock().axes.up_vector();
        Ok(noisy(up, 1e-3))
    }

    fn read_compass(&self, handle: &DeviceHandle) -> Result<Vector3> {
        self.begin_read(handle, "compass")?;
        let field = self.state.lock().axes.apply(Vector3::from(NATIVE_FIELD));
        Ok(noisy(field, 1e-3))
    }

    fn read_temperature(&self, handle: &DeviceHandle) -> Result<f64> {
        self.begin_read(handle, "temperature")?;
        Ok(25.0 + noise(0.05))
    }

    fn send_command(&self, handle: &DeviceHandle, command: &DeviceCommand) -> Result<()> {
        self.check_handle(handle)?;
        let mut state = self.state.lock();
        match command {
            DeviceCommand::Tare => state.yaw = 0.0,
            DeviceCommand::FactoryReset => {
                state.axes = AxisConfiguration::default();
                state.reference_mode = ReferenceVectorMode::default();
                state.led = DEFAULT_LED;
            }
            DeviceCommand::SetLedColor(color) => state.led = *color,
            DeviceCommand::Commit | DeviceCommand::Reset | DeviceCommand::MultiReference => {}
        }
        state.commands.push(*command);
        Ok(())
    }

    fn set_axis_config(&self, handle: &DeviceHandle, axes: AxisConfiguration) -> Result<()> {
        self.check_handle(handle)?;
        tracing::debug!(axis_byte = axes.to_device_byte(), "SimulatedTss: axes set");
        self.state.lock().axes = axes;
        Ok(())
    }

    fn set_reference_vector_mode(
        &self,
        handle: &DeviceHandle,
        mode: ReferenceVectorMode,
    ) -> Result<()> {
        self.check_handle(handle)?;
        tracing::debug!(mode_code = mode.code(), "SimulatedTss: reference mode set");
        self.state.lock().reference_mode = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisOrder;

    #[test]
    fn counts_opens_and_closes() {
        let sim = SimulatedTss::new();
        let a = sim.open("/dev/sim0").unwrap();
        let b = sim.open("/dev/sim0").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(sim.open_handles(), 2);

        sim.close(a).unwrap();
        sim.close(b).unwrap();
        assert_eq!(sim.open_calls(), 2);
        assert_eq!(sim.close_calls(), 2);
        assert_eq!(sim.open_handles(), 0);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let sim = SimulatedTss::new();
        let handle = sim.open("/dev/sim0").unwrap();
        let stale = DeviceHandle::new(handle.id());
        sim.close(handle).unwrap();
        assert!(sim.read_temperature(&stale).is_err());
    }

    #[test]
    fn fail_next_reads_is_exact() {
        let sim = SimulatedTss::new();
        let handle = sim.open("/dev/sim0").unwrap();
        sim.fail_next_reads(2);
        assert!(sim.read_temperature(&handle).is_err());
        assert!(sim.read_temperature(&handle).is_err());
        assert!(sim.read_temperature(&handle).is_ok());
        sim.close(handle).unwrap();
    }

    #[test]
    fn read_latency_delays_reads() {
        let sim = SimulatedTss::new();
        sim.set_read_latency(Duration::from_millis(5));
        let handle = sim.open("/dev/sim0").unwrap();
        let start = std::time::Instant::now();
        sim.read_temperature(&handle).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
        sim.close(handle).unwrap();
    }

    #[test]
    fn accel_follows_axis_configuration() {
        let sim = SimulatedTss::new();
        let handle = sim.open("/dev/sim0").unwrap();
        let axes = AxisConfiguration::new(AxisOrder::Xzy).with_inversion(false, false, true);
        sim.set_axis_config(&handle, axes).unwrap();

        let accel = sim.read_accel(&handle).unwrap();
        assert!((accel.z + 1.0).abs() < 0.01, "accel = {:?}", accel);
        assert!(accel.x.abs() < 0.01 && accel.y.abs() < 0.01);
        sim.close(handle).unwrap();
    }

    #[test]
    fn orientation_turns_about_up_axis() {
        let sim = SimulatedTss::new();
        let handle = sim.open("/dev/sim0").unwrap();
        sim.set_axis_config(&handle, AxisConfiguration::new(AxisOrder::Yzx))
            .unwrap();

        let q = sim.read_orientation(&handle).unwrap();
        let (axis, angle) = q.axis_angle().unwrap();
        assert!((angle - YAW_STEP).abs() < 1e-9);
        assert!((axis.into_inner() - Vector3::x()).norm() < 1e-9);
        sim.close(handle).unwrap();
    }

    #[test]
    fn factory_reset_restores_defaults() {
        let sim = SimulatedTss::new();
        let handle = sim.open("/dev/sim0").unwrap();
        sim.set_axis_config(&handle, AxisConfiguration::new(AxisOrder::Zyx))
            .unwrap();
        sim.send_command(&handle, &DeviceCommand::SetLedColor(LedColor::new(1.0, 0.0, 0.0)))
            .unwrap();
        sim.send_command(&handle, &DeviceCommand::FactoryReset).unwrap();

        assert_eq!(sim.axis_config(), AxisConfiguration::default());
        assert_eq!(sim.led_color(), DEFAULT_LED);
        assert_eq!(sim.commands().len(), 2);
        sim.close(handle).unwrap();
    }
}
