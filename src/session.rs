//! Device session: the open/closed lifecycle and the exclusive access gate.
//!
//! A [`DeviceSession`] owns at most one [`DeviceHandle`] at a time. Every use
//! of the handle, whether a polling read or a one-shot command, goes through
//! [`DeviceSession::access`] or [`DeviceSession::with_exclusive_access`],
//! which hold a single lock for the duration of the transaction. Device
//! transactions therefore never interleave on the wire.
//!
//! All methods block: they take the lock and call into the blocking driver.
//! Async callers run them on the blocking pool (`tokio::task::spawn_blocking`).
//!
//! # Example
//!
//! ```rust,ignore
//! let session = DeviceSession::new(driver, "/dev/ttyACM0", AxisConfiguration::default(),
//!     ReferenceVectorMode::SingleAuto);
//! session.open()?;
//! let temp = session.with_exclusive_access(|driver, handle| driver.read_temperature(handle))?;
//! session.close();
//! ```

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::axis::AxisConfiguration;
use crate::error::{ImuError, Result};
use crate::hardware::driver::{DeviceHandle, ReferenceVectorMode, TssDriver};

// =============================================================================
// DiagnosticCounters
// =============================================================================

/// Failure counters, monotonically non-decreasing for the session's lifetime.
#[derive(Debug, Default)]
pub struct DiagnosticCounters {
    io_failures: AtomicU64,
    open_failures: AtomicU64,
}

/// Point-in-time copy of [`DiagnosticCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Failed device transactions
    pub io_failure_count: u64,
    /// Failed open attempts
    pub open_failure_count: u64,
}

impl DiagnosticCounters {
    /// Count one failed transaction; returns the new total.
    pub fn record_io_failure(&self) -> u64 {
        self.io_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count one failed open attempt; returns the new total.
    pub fn record_open_failure(&self) -> u64 {
        self.open_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Total failed transactions.
    pub fn io_failure_count(&self) -> u64 {
        self.io_failures.load(Ordering::SeqCst)
    }

    /// Total failed open attempts.
    pub fn open_failure_count(&self) -> u64 {
        self.open_failures.load(Ordering::SeqCst)
    }

    /// Copy both counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            io_failure_count: self.io_failure_count(),
            open_failure_count: self.open_failure_count(),
        }
    }
}

// =============================================================================
// SessionAccess - scoped exclusive access
// =============================================================================

/// Exclusive access to an open device.
///
/// Holding a `SessionAccess` holds the session lock; dropping it (on any exit
/// path, including unwinding) releases the lock.
pub struct SessionAccess<'a> {
    driver: &'a dyn TssDriver,
    handle: MappedMutexGuard<'a, DeviceHandle>,
}

impl<'a> SessionAccess<'a> {
    /// The driver to issue calls on.
    pub fn driver(&self) -> &'a dyn TssDriver {
        self.driver
    }

    /// The open handle.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Run one transaction, mapping driver failures to [`ImuError::Io`].
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&dyn TssDriver, &DeviceHandle) -> anyhow::Result<T>,
    ) -> Result<T> {
        f(self.driver, self.handle()).map_err(ImuError::Io)
    }
}

// =============================================================================
// DeviceSession
// =============================================================================

/// Owner of one sensor connection.
pub struct DeviceSession {
    driver: Arc<dyn TssDriver>,
    port: String,
    axes: AxisConfiguration,
    reference_mode: ReferenceVectorMode,
    /// The exclusive access gate
    handle: Mutex<Option<DeviceHandle>>,
    /// Lock-free mirror of `handle.is_some()` for status snapshots
    open: AtomicBool,
    counters: DiagnosticCounters,
}

impl DeviceSession {
    /// Create a closed session.
    pub fn new(
        driver: Arc<dyn TssDriver>,
        port: impl Into<String>,
        axes: AxisConfiguration,
        reference_mode: ReferenceVectorMode,
    ) -> Self {
        Self {
            driver,
            port: port.into(),
            axes,
            reference_mode,
            handle: Mutex::new(None),
            open: AtomicBool::new(false),
            counters: DiagnosticCounters::default(),
        }
    }

    /// Device port path.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Axis configuration applied on every open.
    pub fn axes(&self) -> AxisConfiguration {
        self.axes
    }

    /// Failure counters.
    pub fn counters(&self) -> &DiagnosticCounters {
        &self.counters
    }

    /// Whether a handle is currently held. Does not wait for the lock.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the device.
    ///
    /// No-op if already open. Otherwise calls the driver's `open` exactly once,
    /// then pushes the axis configuration and reference vector mode inside the
    /// same critical section.
    ///
    /// # Errors
    /// Returns [`ImuError::OpenFailure`] (and counts it) if the device cannot be
    /// connected or configured; the session stays closed.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            debug!(port = %self.port, "Device already open");
            return Ok(());
        }

        let handle = match self.driver.open(&self.port) {
            Ok(handle) => handle,
            Err(source) => return Err(self.open_failed(source)),
        };

        if let Err(source) = self.configure(&handle) {
            if let Err(e) = self.driver.close(handle) {
                warn!(port = %self.port, error = %e, "Failed to release unconfigured device");
            }
            return Err(self.open_failed(source));
        }

        *slot = Some(handle);
        self.open.store(true, Ordering::SeqCst);
        info!(port = %self.port, axes = %self.axes, "Device session opened");
        Ok(())
    }

    /// Close the device. No-op if already closed.
    ///
    /// Waits for any in-flight transaction to finish first.
    pub fn close(&self) {
        if self.release() {
            info!(port = %self.port, "Device session closed");
        }
    }

    /// Close after repeated failures so the next open starts from scratch.
    pub fn force_close(&self) {
        if self.release() {
            warn!(port = %self.port, "Device session force-closed, will reopen");
        }
    }

    /// Take the exclusive lock on an open device.
    ///
    /// # Errors
    /// Returns [`ImuError::NotOpen`] if the session is closed.
    pub fn access(&self) -> Result<SessionAccess<'_>> {
        let handle = MutexGuard::try_map(self.handle.lock(), Option::as_mut)
            .map_err(|_| ImuError::NotOpen)?;
        Ok(SessionAccess {
            driver: self.driver.as_ref(),
            handle,
        })
    }

    /// Run `f` against the open device while holding the exclusive lock.
    ///
    /// # Errors
    /// - [`ImuError::NotOpen`] if the session is closed
    /// - [`ImuError::Io`] if `f` fails
    pub fn with_exclusive_access<T>(
        &self,
        f: impl FnOnce(&dyn TssDriver, &DeviceHandle) -> anyhow::Result<T>,
    ) -> Result<T> {
        self.access()?.transact(f)
    }

    fn configure(&self, handle: &DeviceHandle) -> anyhow::Result<()> {
        self.driver.set_axis_config(handle, self.axes)?;
        self.driver
            .set_reference_vector_mode(handle, self.reference_mode)?;
        Ok(())
    }

    fn open_failed(&self, source: anyhow::Error) -> ImuError {
        let total = self.counters.record_open_failure();
        warn!(port = %self.port, error = %source, open_failures = total, "Failed to open device");
        ImuError::OpenFailure {
            port: self.port.clone(),
            source,
        }
    }

    /// Release the handle if held; returns whether one was released.
    fn release(&self) -> bool {
        let mut slot = self.handle.lock();
        let Some(handle) = slot.take() else {
            return false;
        };
        self.open.store(false, Ordering::SeqCst);
        if let Err(e) = self.driver.close(handle) {
            warn!(port = %self.port, error = %e, "Driver reported error while closing");
        }
        true
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            debug!(port = %self.port, "Closing device session on drop");
            if let Err(e) = self.driver.close(handle) {
                warn!(port = %self.port, error = %e, "Error closing device on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedTss;

    fn session_with(sim: &Arc<SimulatedTss>) -> DeviceSession {
        DeviceSession::new(
            sim.clone(),
            "/dev/sim0",
            AxisConfiguration::default(),
            ReferenceVectorMode::SingleAuto,
        )
    }

    #[test]
    fn starts_closed() {
        let sim = Arc::new(SimulatedTss::new());
        let session = session_with(&sim);
        assert!(!session.is_open());
        assert!(matches!(
            session.with_exclusive_access(|d, h| d.read_temperature(h)),
            Err(ImuError::NotOpen)
        ));
    }

    #[test]
    fn open_is_idempotent() {
        let sim = Arc::new(SimulatedTss::new());
        let session = session_with(&sim);
        session.open().unwrap();
        session.open().unwrap();
        assert!(session.is_open());
        assert_eq!(sim.open_calls(), 1);
    }

    #[test]
    fn open_failure_is_counted_and_leaves_session_closed() {
        let sim = Arc::new(SimulatedTss::new());
        sim.set_fail_open(true);
        let session = session_with(&sim);

        let err = session.open().unwrap_err();
        assert!(matches!(err, ImuError::OpenFailure { .. }));
        assert!(!session.is_open());
        assert_eq!(session.counters().open_failure_count(), 1);

        sim.set_fail_open(false);
        session.open().unwrap();
        assert_eq!(session.counters().open_failure_count(), 1);
    }

    #[test]
    #[tracing_test::traced_test]
    fn open_failure_is_logged_with_port() {
        let sim = Arc::new(SimulatedTss::new());
        sim.set_fail_open(true);
        let session = session_with(&sim);
        assert!(session.open().is_err());
        assert!(logs_contain("Failed to open device"));
        assert!(logs_contain("/dev/sim0"));
    }

    #[test]
    fn open_pushes_axis_configuration() {
        use crate::axis::AxisOrder;

        let sim = Arc::new(SimulatedTss::new());
        let axes = AxisConfiguration::new(AxisOrder::Zxy).with_inversion(true, false, false);
        let session = DeviceSession::new(sim.clone(), "/dev/sim0", axes, ReferenceVectorMode::Multi);
        session.open().unwrap();
        assert_eq!(sim.axis_config(), axes);
        assert_eq!(sim.reference_mode(), ReferenceVectorMode::Multi);
    }

    #[test]
    fn close_then_access_is_not_open() {
        let sim = Arc::new(SimulatedTss::new());
        let session = session_with(&sim);
        session.open().unwrap();
        session.close();
        session.close();
        assert!(matches!(session.access(), Err(ImuError::NotOpen)));
        assert_eq!(sim.open_calls(), sim.close_calls());
    }

    #[test]
    fn driver_error_maps_to_io() {
        let sim = Arc::new(SimulatedTss::new());
        let session = session_with(&sim);
        session.open().unwrap();
        sim.fail_next_reads(1);
        assert!(matches!(
            session.with_exclusive_access(|d, h| d.read_accel(h)),
            Err(ImuError::Io(_))
        ));
        // Lock was released on the error path
        assert!(session.with_exclusive_access(|d, h| d.read_accel(h)).is_ok());
    }

    #[test]
    fn drop_closes_open_handle() {
        let sim = Arc::new(SimulatedTss::new());
        {
            let session = session_with(&sim);
            session.open().unwrap();
            assert_eq!(sim.open_handles(), 1);
        }
        assert_eq!(sim.open_handles(), 0);
        assert_eq!(sim.open_calls(), sim.close_calls());
    }

    #[test]
    fn counters_are_monotonic() {
        let counters = DiagnosticCounters::default();
        assert_eq!(counters.record_io_failure(), 1);
        assert_eq!(counters.record_io_failure(), 2);
        assert_eq!(counters.record_open_failure(), 1);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                io_failure_count: 2,
                open_failure_count: 1
            }
        );
    }
}
