//! Health diagnostics for the sensor session.
//!
//! The polling loop feeds successful tick timestamps into a [`RateTracker`];
//! [`DiagnosticsAggregator::report`] combines the observed rate with the
//! session's open state and failure counters into a [`DiagnosticReport`].
//! Building a report never mutates the counters or the tracker.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::session::DeviceSession;

/// Severity of a diagnostic status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosticLevel {
    /// Operating normally
    Ok = 0,
    /// Degraded but functional
    Warn = 1,
    /// Not producing data
    Error = 2,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Ok => write!(f, "OK"),
            DiagnosticLevel::Warn => write!(f, "WARN"),
            DiagnosticLevel::Error => write!(f, "ERROR"),
        }
    }
}

// =============================================================================
// RateTracker
// =============================================================================

struct RateWindow {
    started: Instant,
    ticks: VecDeque<Instant>,
}

/// Sliding-window estimate of how often the polling loop succeeds.
pub struct RateTracker {
    window: Duration,
    inner: Mutex<RateWindow>,
}

impl RateTracker {
    /// Create a tracker averaging over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(RateWindow {
                started: Instant::now(),
                ticks: VecDeque::new(),
            }),
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Forget recorded ticks and restart the observation period at `now`.
    pub fn reset(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.started = now;
        inner.ticks.clear();
    }

    /// Record one successful tick at `now`.
    pub fn record(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.ticks.push_back(now);
        while let Some(&oldest) = inner.ticks.front() {
            if now.saturating_duration_since(oldest) > self.window {
                inner.ticks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Ticks recorded within the window ending at `now`.
    pub fn events_in_window(&self, now: Instant) -> usize {
        let inner = self.inner.lock();
        inner
            .ticks
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) <= self.window)
            .count()
    }

    /// Observed ticks per second over the window ending at `now`.
    ///
    /// Shortly after a reset the span is the time since the reset, so the
    /// estimate is not diluted by time before polling started.
    pub fn observed_frequency(&self, now: Instant) -> f64 {
        let events = self.events_in_window(now);
        let started = self.inner.lock().started;
        let span = now.saturating_duration_since(started).min(self.window);
        if events == 0 || span.is_zero() {
            return 0.0;
        }
        events as f64 / span.as_secs_f64()
    }
}

// =============================================================================
// FrequencyBounds
// =============================================================================

/// Accepted band for the polling rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyBounds {
    /// Lowest acceptable rate in Hz
    pub min_update_rate: f64,
    /// Highest acceptable rate in Hz
    pub max_update_rate: f64,
    /// Fractional slack applied to both bounds
    pub tolerance: f64,
}

impl FrequencyBounds {
    /// Bounds with the given rates and a 10% tolerance.
    pub fn new(min_update_rate: f64, max_update_rate: f64) -> Self {
        Self {
            min_update_rate,
            max_update_rate,
            tolerance: 0.1,
        }
    }

    /// Override the tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Classify an observed rate.
    pub fn classify(&self, frequency: f64, events: usize) -> (DiagnosticLevel, &'static str) {
        if events == 0 {
            (DiagnosticLevel::Error, "No events recorded")
        } else if frequency < self.min_update_rate * (1.0 - self.tolerance) {
            (DiagnosticLevel::Warn, "Frequency too low")
        } else if frequency > self.max_update_rate * (1.0 + self.tolerance) {
            (DiagnosticLevel::Warn, "Frequency too high")
        } else {
            (DiagnosticLevel::Ok, "Desired frequency met")
        }
    }
}

// =============================================================================
// DiagnosticsAggregator
// =============================================================================

/// Health snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// Worst of connection and frequency level
    pub level: DiagnosticLevel,
    /// Human-readable summary
    pub message: String,
    /// Device port
    pub port: String,
    /// Whether the session holds a handle
    pub open: bool,
    /// Failed device transactions so far
    pub io_failure_count: u64,
    /// Failed open attempts so far
    pub open_failure_count: u64,
    /// Successful ticks per second over the window
    pub observed_frequency: f64,
    /// Successful ticks inside the window
    pub events_in_window: usize,
    /// Level from the rate check alone
    pub frequency_level: DiagnosticLevel,
    /// Message from the rate check alone
    pub frequency_message: &'static str,
    /// Bounds the rate was checked against
    pub bounds: FrequencyBounds,
}

/// Assembles [`DiagnosticReport`]s on demand.
pub struct DiagnosticsAggregator {
    session: Arc<DeviceSession>,
    rate: Arc<RateTracker>,
    bounds: FrequencyBounds,
}

impl DiagnosticsAggregator {
    /// Create an aggregator over a session and its rate tracker.
    pub fn new(session: Arc<DeviceSession>, rate: Arc<RateTracker>, bounds: FrequencyBounds) -> Self {
        Self {
            session,
            rate,
            bounds,
        }
    }

    /// Frequency bounds in use.
    pub fn bounds(&self) -> FrequencyBounds {
        self.bounds
    }

    /// Build a report for the current instant.
    pub fn report(&self) -> DiagnosticReport {
        self.report_at(Instant::now())
    }

    /// Build a report as of `now`.
    pub fn report_at(&self, now: Instant) -> DiagnosticReport {
        let open = self.session.is_open();
        let counters = self.session.counters().snapshot();
        let events = self.rate.events_in_window(now);
        let frequency = self.rate.observed_frequency(now);
        let (frequency_level, frequency_message) = self.bounds.classify(frequency, events);

        let (connection_level, connection_message) = if open {
            (DiagnosticLevel::Ok, "Connected")
        } else {
            (DiagnosticLevel::Error, "Disconnected")
        };

        let level = connection_level.max(frequency_level);
        let message = if frequency_level == DiagnosticLevel::Ok || !open {
            connection_message.to_string()
        } else {
            format!("{connection_message}: {frequency_message}")
        };

        DiagnosticReport {
            level,
            message,
            port: self.session.port().to_string(),
            open,
            io_failure_count: counters.io_failure_count,
            open_failure_count: counters.open_failure_count,
            observed_frequency: frequency,
            events_in_window: events,
            frequency_level,
            frequency_message,
            bounds: self.bounds,
        }
    }
}
