//! Shared fakes for integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tss_imu::axis::AxisConfiguration;
use tss_imu::hardware::{DeviceCommand, DeviceHandle, ReferenceVectorMode, TssDriver};
use tss_imu::reading::{Orientation, Vector3};

/// One driver call, in the order the device saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Orientation,
    Gyro,
    Accel,
    Compass,
    Temperature,
    Command,
    Configure,
    Close,
}

/// Driver that records every call and detects overlapping transactions.
///
/// Each call sleeps for `latency` while marked in flight; a second call
/// arriving during that window counts as an overlap.
pub struct InstrumentedDriver {
    latency: Duration,
    in_flight: AtomicUsize,
    overlaps: AtomicU64,
    opens: AtomicU64,
    closes: AtomicU64,
    next_handle: AtomicU64,
    fail_reads: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InstrumentedDriver {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: AtomicUsize::new(0),
            overlaps: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            next_handle: AtomicU64::new(1),
            fail_reads: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn enter(&self, call: Call) -> InFlight<'_> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().push(call);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        InFlight(&self.in_flight)
    }

    fn read<T>(&self, call: Call, value: T) -> Result<T> {
        let _guard = self.enter(call);
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("injected read failure");
        }
        Ok(value)
    }
}

impl TssDriver for InstrumentedDriver {
    fn open(&self, _port: &str) -> Result<DeviceHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    fn close(&self, _handle: DeviceHandle) -> Result<()> {
        let _guard = self.enter(Call::Close);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_orientation(&self, _handle: &DeviceHandle) -> Result<Orientation> {
        self.read(Call::Orientation, Orientation::identity())
    }

    fn read_gyro(&self, _handle: &DeviceHandle) -> Result<Vector3> {
        self.read(Call::Gyro, Vector3::zeros())
    }

    fn read_accel(&self, _handle: &DeviceHandle) -> Result<Vector3> {
        self.read(Call::Accel, Vector3::new(0.0, 1.0, 0.0))
    }

    fn read_compass(&self, _handle: &DeviceHandle) -> Result<Vector3> {
        self.read(Call::Compass, Vector3::new(0.2, -0.4, 0.0))
    }

    fn read_temperature(&self, _handle: &DeviceHandle) -> Result<f64> {
        self.read(Call::Temperature, 24.5)
    }

    fn send_command(&self, _handle: &DeviceHandle, _command: &DeviceCommand) -> Result<()> {
        let _guard = self.enter(Call::Command);
        Ok(())
    }

    fn set_axis_config(&self, _handle: &DeviceHandle, _axes: AxisConfiguration) -> Result<()> {
        let _guard = self.enter(Call::Configure);
        Ok(())
    }

    fn set_reference_vector_mode(
        &self,
        _handle: &DeviceHandle,
        _mode: ReferenceVectorMode,
    ) -> Result<()> {
        let _guard = self.enter(Call::Configure);
        Ok(())
    }
}

/// Indices of every tick in `calls` whose five reads were not contiguous.
pub fn split_ticks(calls: &[Call]) -> Vec<usize> {
    const TICK: [Call; 5] = [
        Call::Orientation,
        Call::Gyro,
        Call::Accel,
        Call::Compass,
        Call::Temperature,
    ];
    calls
        .iter()
        .enumerate()
        .filter(|(_, call)| **call == Call::Orientation)
        .filter(|(i, _)| calls.get(*i..*i + 5) != Some(&TICK[..]))
        .map(|(i, _)| i)
        .collect()
}
