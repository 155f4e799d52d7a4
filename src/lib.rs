//! `switchbot-collector` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. A run is orchestrated by [`crate::app::collect`]
//! where it can be tested deterministically with injected discovery, sink
//! and reporter.

pub mod app;
pub mod config;
pub mod device;
pub mod duration;
pub mod mac_address;
pub mod pipeline;
pub mod point;
pub mod report;
pub mod scanner;
pub mod selector;
pub mod sink;
pub mod switchbot;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{BleDiscovery, Discovery, LogFormat, Options, RunError, collect};
pub use config::{ConfigError, RunConfiguration};
pub use device::{DiscoveredDevice, DiscoveryResult, Reading};
pub use mac_address::MacAddress;
pub use pipeline::RunOutcome;
pub use point::{FieldValue, MeasurementPoint};
pub use report::{PipelineEvent, Reporter, TracingReporter};
pub use scanner::{Backend, DecodeError, ScanError};
pub use sink::{InfluxDbSink, PointSink, WriteError};
