//! CLI entry point for the 3-Space sensor node.
//!
//! Runs one node against the simulated sensor and:
//! - prints every reading as a JSON line on stdout
//! - logs a diagnostics report once per second
//! - reads command lines from stdin (`tare`, `commit`, `led-color 1 0 0`, ...)
//!
//! Ctrl-C or end of stdin shuts the node down cleanly.
//!
//! # Usage
//!
//! ```bash
//! tss_imu --config config/tss_imu.toml --frequency 50 --log-format json
//! echo "led-color 0 1 0" | tss_imu --port /dev/ttyACM1
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use tss_imu::commands::CommandRequest;
use tss_imu::config::{ImuConfig, DEFAULT_CONFIG_PATH};
use tss_imu::diagnostics::{DiagnosticLevel, DiagnosticReport};
use tss_imu::hardware::SimulatedTss;
use tss_imu::logging::{self, LoggingConfig, OutputFormat};
use tss_imu::node::TssImu;

#[derive(Parser)]
#[command(name = "tss_imu")]
#[command(about = "3-Space USB sensor node (simulated device)", long_about = None)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the device port
    #[arg(long)]
    port: Option<String>,

    /// Override the polling frequency in Hz
    #[arg(long)]
    frequency: Option<f64>,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,

    /// Disable colored output in the pretty format
    #[arg(long)]
    no_ansi: bool,

    /// Also log span open/close events
    #[arg(long)]
    span_events: bool,
}

impl Cli {
    fn logging(&self, config: &ImuConfig) -> Result<LoggingConfig> {
        Ok(LoggingConfig::from_config(config)
            .map_err(anyhow::Error::msg)?
            .with_format(self.log_format)
            .with_ansi(!self.no_ansi)
            .with_span_events(self.span_events))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ImuConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port.clone() {
        config.port = port;
    }
    if let Some(frequency) = cli.frequency {
        config.frequency = frequency;
    }
    if let Some(level) = cli.log_level.clone() {
        config.log_level = level;
    }

    logging::init(cli.logging(&config)?).map_err(anyhow::Error::msg)?;

    let mut imu = TssImu::new(config, Arc::new(SimulatedTss::new()))?;
    let mut readings = imu.subscribe();
    imu.open().await.context("opening sensor")?;

    let mut diagnostics_timer = tokio::time::interval(Duration::from_secs(1));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            reading = readings.recv() => match reading {
                Ok(reading) => println!("{}", serde_json::to_string(&reading)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind, readings dropped"),
                Err(RecvError::Closed) => break,
            },
            _ = diagnostics_timer.tick() => log_report(&imu.diagnostics()),
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => handle_command(&imu, &line).await,
                None => {
                    info!("stdin closed, shutting down");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    imu.close().await?;
    Ok(())
}

async fn handle_command(imu: &TssImu, line: &str) {
    let request = match line.parse::<CommandRequest>() {
        Ok(request) => request,
        Err(e) => {
            warn!(line, error = %e, "Ignoring command");
            return;
        }
    };
    if let Err(e) = imu.dispatch(request).await {
        warn!(command = %request.kind, error = %e, "Command rejected");
    }
}

fn log_report(report: &DiagnosticReport) {
    let frequency = format!("{:.1}", report.observed_frequency);
    match report.level {
        DiagnosticLevel::Ok => info!(
            port = %report.port,
            frequency = %frequency,
            io_failures = report.io_failure_count,
            "{}", report.message
        ),
        DiagnosticLevel::Warn => warn!(
            port = %report.port,
            frequency = %frequency,
            io_failures = report.io_failure_count,
            status = report.frequency_message,
            "{}", report.message
        ),
        DiagnosticLevel::Error => error!(
            port = %report.port,
            frequency = %frequency,
            io_failures = report.io_failure_count,
            open_failures = report.open_failure_count,
            status = report.frequency_message,
            "{}", report.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_flags_reach_subscriber_options() {
        let cli = Cli::parse_from([
            "tss_imu",
            "--log-format",
            "pretty",
            "--no-ansi",
            "--span-events",
        ]);
        let config = ImuConfig {
            log_level: "debug".into(),
            ..Default::default()
        };
        let logging = cli.logging(&config).unwrap();
        assert_eq!(logging.level, tracing::Level::DEBUG);
        assert_eq!(logging.format, OutputFormat::Pretty);
        assert!(!logging.with_ansi);
        assert!(logging.with_span_events);
    }

    #[test]
    fn logging_defaults_keep_colors_and_skip_spans() {
        let cli = Cli::parse_from(["tss_imu"]);
        let logging = cli.logging(&ImuConfig::default()).unwrap();
        assert!(logging.with_ansi);
        assert!(!logging.with_span_events);
        assert!(cli.logging(&ImuConfig {
            log_level: "loud".into(),
            ..Default::default()
        })
        .is_err());
    }
}
