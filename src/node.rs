//! Sensor node: one session plus its polling task, command path and diagnostics.
//!
//! [`TssImu`] wires the parts together from an [`ImuConfig`]:
//!
//! ```text
//!                 ┌──────────────┐   SensorReading   ┌─────────────┐
//!  PollingLoop ──►│              │──────────────────►│ subscribers │
//!                 │ DeviceSession│                   └─────────────┘
//!  Commands ─────►│  (one lock)  │
//!                 └──────┬───────┘
//!                        │ counters, open state
//!                        ▼
//!               DiagnosticsAggregator ◄── RateTracker ◄── PollingLoop
//! ```
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use tss_imu::{config::ImuConfig, hardware::SimulatedTss, node::TssImu};
//!
//! # async fn run() -> tss_imu::error::Result<()> {
//! let mut imu = TssImu::new(ImuConfig::default(), Arc::new(SimulatedTss::new()))?;
//! let mut readings = imu.subscribe();
//! imu.open().await?;
//! if let Ok(reading) = readings.recv().await {
//!     println!("{:?}", reading.orientation);
//! }
//! imu.commands().tare().await?;
//! imu.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

use crate::commands::{CommandDispatcher, CommandRequest};
use crate::config::ImuConfig;
use crate::diagnostics::{DiagnosticReport, DiagnosticsAggregator, RateTracker};
use crate::error::Result;
use crate::hardware::driver::TssDriver;
use crate::polling::{Poller, PollingLoop};
use crate::reading::SensorReading;
use crate::session::DeviceSession;

/// A configured 3-Space sensor node.
pub struct TssImu {
    config: ImuConfig,
    session: Arc<DeviceSession>,
    rate: Arc<RateTracker>,
    readings: broadcast::Sender<SensorReading>,
    commands: CommandDispatcher,
    diagnostics: DiagnosticsAggregator,
    polling: Option<PollingLoop>,
}

impl TssImu {
    /// Build a closed node.
    ///
    /// # Errors
    /// Returns [`ImuError::InvalidConfiguration`](crate::error::ImuError::InvalidConfiguration)
    /// if `config` does not validate.
    pub fn new(config: ImuConfig, driver: Arc<dyn TssDriver>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(DeviceSession::new(
            driver,
            config.port.clone(),
            config.axis_configuration()?,
            config.reference_vector_mode,
        ));
        let rate = Arc::new(RateTracker::new(config.frequency_window()));
        let (readings, _) = broadcast::channel(config.channel_capacity);
        let commands = CommandDispatcher::new(session.clone());
        let diagnostics =
            DiagnosticsAggregator::new(session.clone(), rate.clone(), config.frequency_bounds());

        Ok(Self {
            config,
            session,
            rate,
            readings,
            commands,
            diagnostics,
            polling: None,
        })
    }

    /// Open the device and start polling.
    ///
    /// No-op if already polling.
    ///
    /// # Errors
    /// Returns [`ImuError::OpenFailure`](crate::error::ImuError::OpenFailure) if
    /// the device cannot be opened; polling is not started.
    pub async fn open(&mut self) -> Result<()> {
        if self.polling.is_some() {
            return Ok(());
        }

        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.open()).await??;

        self.rate.reset(Instant::now());
        let poller = Poller::new(
            self.session.clone(),
            self.rate.clone(),
            self.readings.clone(),
            self.config.polling_config(),
        );
        self.polling = Some(PollingLoop::spawn(poller));
        info!(
            port = %self.config.port,
            frequency = self.config.frequency,
            "Sensor node started"
        );
        Ok(())
    }

    /// Stop polling, wait for the in-flight tick, then close the device.
    ///
    /// # Errors
    /// Returns [`ImuError::Task`](crate::error::ImuError::Task) if the polling
    /// task panicked; the session is closed regardless.
    pub async fn close(&mut self) -> Result<()> {
        let stopped = match self.polling.take() {
            Some(polling) => polling.stop().await,
            None => Ok(()),
        };

        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.close()).await?;
        info!(port = %self.config.port, "Sensor node stopped");
        stopped
    }

    /// Receive every reading published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorReading> {
        self.readings.subscribe()
    }

    /// Command path for this node's session.
    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    /// Route an external command request.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<()> {
        self.commands.dispatch(request).await
    }

    /// Current health snapshot.
    pub fn diagnostics(&self) -> DiagnosticReport {
        self.diagnostics.report()
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Configuration the node was built with.
    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    /// Whether the polling task is running.
    pub fn is_polling(&self) -> bool {
        self.polling.as_ref().is_some_and(PollingLoop::is_running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandKind;
    use crate::diagnostics::DiagnosticLevel;
    use crate::error::ImuError;
    use crate::hardware::{DeviceCommand, SimulatedTss};
    use std::time::Duration;

    fn config() -> ImuConfig {
        ImuConfig {
            port: "/dev/sim0".into(),
            frequency: 200.0,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_invalid_frequency() {
        let sim = Arc::new(SimulatedTss::new());
        let bad = ImuConfig {
            frequency: 0.0,
            ..config()
        };
        assert!(matches!(
            TssImu::new(bad, sim),
            Err(ImuError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn open_publishes_and_close_releases() {
        let sim = Arc::new(SimulatedTss::new());
        let mut imu = TssImu::new(config(), sim.clone()).unwrap();
        let mut rx = imu.subscribe();

        imu.open().await.unwrap();
        imu.open().await.unwrap();
        assert!(imu.is_polling());

        let reading = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.frame_id, "imu_link");

        imu.close().await.unwrap();
        assert!(!imu.is_polling());
        assert!(!imu.session().is_open());
        assert_eq!(sim.open_calls(), 1);
        assert_eq!(sim.close_calls(), 1);
        assert!(matches!(imu.commands().tare().await, Err(ImuError::NotOpen)));
    }

    #[tokio::test]
    async fn open_failure_does_not_start_polling() {
        let sim = Arc::new(SimulatedTss::new());
        sim.set_fail_open(true);
        let mut imu = TssImu::new(config(), sim).unwrap();

        assert!(matches!(imu.open().await, Err(ImuError::OpenFailure { .. })));
        assert!(!imu.is_polling());
        let report = imu.diagnostics();
        assert_eq!(report.level, DiagnosticLevel::Error);
        assert_eq!(report.open_failure_count, 1);
    }

    #[tokio::test]
    async fn dispatch_reaches_device() {
        let sim = Arc::new(SimulatedTss::new());
        let mut imu = TssImu::new(config(), sim.clone()).unwrap();
        imu.open().await.unwrap();

        imu.dispatch(CommandRequest::new(CommandKind::Tare))
            .await
            .unwrap();
        imu.dispatch("led-color 1 0 0".parse().unwrap()).await.unwrap();
        imu.close().await.unwrap();

        let commands = sim.commands();
        assert!(commands.contains(&DeviceCommand::Tare));
        assert_eq!(sim.led_color().r, 1.0);
    }
}
