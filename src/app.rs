//! Core application runner (business logic) for `switchbot-collector`.
//!
//! This module is decoupled from CLI parsing, logging setup and process exit
//! codes. Discovery, the sink and the reporter are all injected so a whole
//! run can be driven deterministically in tests.

use crate::config::{ConfigError, RunConfiguration};
use crate::device::DiscoveryResult;
use crate::duration::parse_duration;
use crate::pipeline::{self, RunOutcome};
use crate::report::Reporter;
use crate::scanner::{Backend, ScanError};
use crate::sink::PointSink;
use clap::Parser;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Process knobs. Connection settings come from the environment through
/// [`RunConfiguration`] instead.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// How long to listen for sensor advertisements.
    /// Accepts duration with suffix: 60s, 1m, 500ms.
    #[arg(long, env = "SCAN_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    pub scan_timeout: Duration,

    /// Request timeout for the InfluxDB write.
    #[arg(
        long,
        env = "INFLUXDB_WRITE_TIMEOUT",
        default_value = "10s",
        value_parser = parse_duration
    )]
    pub write_timeout: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose output, log decode failures and request details
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Log output format
    #[arg(long, default_value_t, value_enum)]
    pub log_format: LogFormat,
}

/// Errors that end a run before or during discovery.
///
/// Sink problems are not in here, not even an unusable URL: they surface as
/// write failures per device and the run still completes.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Future returned by [`Discovery::discover`].
pub type DiscoveryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<DiscoveryResult, ScanError>> + Send + 'a>>;

/// Discovery abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Discovery: Send + Sync {
    fn discover(&self, scan_timeout: Duration) -> DiscoveryFuture<'_>;
}

/// Real discovery that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BleDiscovery {
    pub backend: Backend,
}

impl Discovery for BleDiscovery {
    fn discover(&self, scan_timeout: Duration) -> DiscoveryFuture<'_> {
        Box::pin(crate::scanner::discover(self.backend, scan_timeout))
    }
}

/// Run one collection.
///
/// 1. Reads the configuration through `lookup`; a missing key ends the run
///    before any Bluetooth or network activity
/// 2. Builds the sink with `connect`, which cannot fail
/// 3. Scans for `options.scan_timeout`
/// 4. Writes the configured device, if it was seen
///
/// Every [`RunOutcome`] is a normal end of the run, including failed writes.
pub async fn collect<L, C, S>(
    lookup: L,
    options: &Options,
    discovery: &dyn Discovery,
    connect: C,
    reporter: &dyn Reporter,
) -> Result<RunOutcome, RunError>
where
    L: Fn(&str) -> Option<String>,
    C: FnOnce(&RunConfiguration) -> S,
    S: PointSink,
{
    let config = RunConfiguration::from_lookup(lookup)?;
    debug!(?config, "configuration loaded");

    let sink = connect(&config);

    let devices = discovery.discover(options.scan_timeout).await?;
    debug!(devices = devices.len(), "discovery finished");

    Ok(pipeline::process(&devices, &config, &sink, reporter).await)
}
