//! Fixed-rate polling loop.
//!
//! A single tokio task ticks at the configured frequency. Each tick runs
//! [`Poller::tick`] on the blocking pool: reopen the session if needed, read
//! the five sensor values inside one exclusive transaction, compensate for
//! gravity and broadcast a [`SensorReading`].
//!
//! Device failures never end the loop. Each failed read is counted; after
//! `reconnect_threshold` consecutive failures the session is force-closed and
//! reopened on the next tick. Overrunning ticks fire the next one immediately
//! without a catch-up burst (`MissedTickBehavior::Delay`).

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::diagnostics::RateTracker;
use crate::error::{ImuError, Result};
use crate::reading::{
    diagonal_covariance, RawSample, ReadingCovariances, SensorReading, Vector3,
    GRAVITATIONAL_ACCELERATION, STANDARD_GRAVITY,
};
use crate::session::DeviceSession;

/// Polling loop settings.
/// Settings for one polling loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Tick period (1 / frequency)
    pub period: Duration,
    /// Consecutive read failures before the session is force-closed
    pub reconnect_threshold: u32,
    /// Frame id stamped on readings
    pub frame_id: String,
    /// Uncertainty attached to every reading
    pub covariances: ReadingCovariances,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A reading was broadcast
    Published,
    /// Session closed and could not be reopened; tick skipped
    Skipped,
    /// Read failed; `consecutive` failures so far
    ReadFailed { consecutive: u32 },
    /// Read failed and the threshold was reached; session force-closed
    Disconnected,
}

/// Read all five values in one transaction.
fn read_sample(session: &DeviceSession) -> Result<RawSample> {
    session.with_exclusive_access(|driver, handle| {
        Ok(RawSample {
            orientation: driver.read_orientation(handle)?,
            angular_velocity: driver.read_gyro(handle)?,
            acceleration_g: driver.read_accel(handle)?,
            magnetic_field: driver.read_compass(handle)?,
            temperature: driver.read_temperature(handle)?,
        })
    })
}

/// Acceleration an accelerometer at rest reports: `down * GRAVITATIONAL_ACCELERATION`.
pub fn gravity_vector(down: Vector3) -> Vector3 {
    down * GRAVITATIONAL_ACCELERATION
}

/// Convert a raw accelerometer value in g to m/s² with gravity removed.
pub fn compensate_gravity(acceleration_g: Vector3, down: Vector3) -> Vector3 {
    acceleration_g * STANDARD_GRAVITY - gravity_vector(down)
}

// =============================================================================
// Poller - one tick of work, synchronous
// =============================================================================

/// Per-tick state machine, run on the blocking pool by [`PollingLoop`].
pub struct Poller {
    session: Arc<DeviceSession>,
    rate: Arc<RateTracker>,
    publisher: broadcast::Sender<SensorReading>,
    config: PollingConfig,
    down: Vector3,
    consecutive_failures: u32,
}

impl Poller {
    /// Create a poller over `session`, publishing on `publisher`.
    pub fn new(
        session: Arc<DeviceSession>,
        rate: Arc<RateTracker>,
        publisher: broadcast::Sender<SensorReading>,
        config: PollingConfig,
    ) -> Self {
        let down = session.axes().down_vector();
        Self {
            session,
            rate,
            publisher,
            config,
            down,
            consecutive_failures: 0,
        }
    }

    /// Consecutive failed reads since the last success or reconnect.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one tick. Blocks on the session lock and device I/O.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.session.is_open() {
            // Failure is counted by the session
            if self.session.open().is_err() {
                return TickOutcome::Skipped;
            }
            info!(port = %self.session.port(), "Device reconnected");
            self.consecutive_failures = 0;
        }

        match read_sample(&self.session) {
            Ok(sample) => {
                self.consecutive_failures = 0;
                self.rate.record(Instant::now());
                let reading = self.build_reading(sample);
                // No subscribers is fine
                let receivers = self.publisher.send(reading).unwrap_or(0);
                trace!(receivers, "Published reading");
                TickOutcome::Published
            }
            Err(err) if err.is_transient() => self.read_failed(&err),
            // Closed between the open check and the read
            Err(_) => TickOutcome::Skipped,
        }
    }

    fn read_failed(&mut self, err: &ImuError) -> TickOutcome {
        let total = self.session.counters().record_io_failure();
        self.consecutive_failures += 1;
        warn!(
            error = %err,
            consecutive = self.consecutive_failures,
            io_failures = total,
            "Sensor read failed"
        );

        if self.consecutive_failures >= self.config.reconnect_threshold {
            self.session.force_close();
            self.consecutive_failures = 0;
            TickOutcome::Disconnected
        } else {
            TickOutcome::ReadFailed {
                consecutive: self.consecutive_failures,
            }
        }
    }

    fn build_reading(&self, sample: RawSample) -> SensorReading {
        let cov = &self.config.covariances;
        SensorReading {
            frame_id: self.config.frame_id.clone(),
            timestamp: Utc::now(),
            orientation: sample.orientation,
            orientation_covariance: diagonal_covariance(cov.orientation),
            angular_velocity: sample.angular_velocity,
            angular_velocity_covariance: diagonal_covariance(cov.angular_velocity),
            linear_acceleration: compensate_gravity(sample.acceleration_g, self.down),
            linear_acceleration_covariance: diagonal_covariance(cov.linear_acceleration),
            magnetic_field: sample.magnetic_field,
            magnetic_field_covariance: diagonal_covariance(cov.magnetic_field),
            temperature: sample.temperature,
            temperature_variance: cov.temperature_variance,
        }
    }
}

// =============================================================================
// PollingLoop - background task
// =============================================================================

/// Handle to the running polling task.
///
/// Dropping the handle also stops the task after its current tick.
pub struct PollingLoop {
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PollingLoop {
    /// Start polling. Must be called from within a tokio runtime.
    pub fn spawn(poller: Poller) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let period = poller.config.period;

        let handle = tokio::spawn(async move {
            let mut poller = Some(poller);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?period, "Polling loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(mut current) = poller.take() else {
                            break;
                        };
                        // The whole tick runs to completion even if shutdown
                        // arrives meanwhile; no transaction is cut short.
                        let result = tokio::task::spawn_blocking(move || {
                            let outcome = current.tick();
                            (current, outcome)
                        })
                        .await;

                        match result {
                            Ok((returned, outcome)) => {
                                trace!(?outcome, "Tick finished");
                                poller = Some(returned);
                            }
                            Err(e) => {
                                error!(error = %e, "Polling tick panicked, stopping loop");
                                break;
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
            debug!("Polling loop stopped");
        });

        Self {
            task_handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the task and wait for the in-flight tick to finish.
    ///
    /// # Errors
    /// Returns [`ImuError::Task`] if the task panicked.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}
