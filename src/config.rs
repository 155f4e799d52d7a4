//! Run configuration read from the process environment.
//!
//! The gate is a pure function from a key lookup to [`RunConfiguration`], so
//! tests can drive it without touching the real environment. Every required
//! value has to be present and non-empty before any Bluetooth or network
//! activity starts.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INFLUXDB_TOKEN: &str = "INFLUXDB_TOKEN";
pub const INFLUXDB_URL: &str = "INFLUXDB_URL";
pub const INFLUXDB_ORG: &str = "INFLUXDB_ORG";
pub const INFLUXDB_BUCKET: &str = "INFLUXDB_BUCKET";
pub const INFLUXDB_MEASUREMENT: &str = "INFLUXDB_MEASUREMENT";
pub const DEVICE_ID: &str = "DEVICE_ID";

/// Keys that must be set for a run to start, in reporting order.
pub const REQUIRED_KEYS: [&str; 5] = [
    INFLUXDB_TOKEN,
    INFLUXDB_URL,
    INFLUXDB_ORG,
    INFLUXDB_BUCKET,
    INFLUXDB_MEASUREMENT,
];

/// Errors returned by the configuration gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Immutable settings for a single collection run.
#[derive(Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    pub sink_url: String,
    pub sink_token: String,
    pub sink_org: String,
    pub sink_bucket: String,
    pub measurement_name: String,
    /// Address of the device to record. `None` matches nothing.
    pub target_device_identity: Option<String>,
}

impl RunConfiguration {
    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Values that are set but empty are treated as missing. The error lists
    /// every missing key, not just the first one.
    ///
    /// # Example
    /// ```
    /// use switchbot_collector::config::{ConfigError, RunConfiguration};
    ///
    /// let err = RunConfiguration::from_lookup(|_| None).unwrap_err();
    /// assert!(matches!(err, ConfigError::Missing(keys) if keys.len() == 5));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.is_empty());

        match REQUIRED_KEYS.map(&value) {
            [
                Some(sink_token),
                Some(sink_url),
                Some(sink_org),
                Some(sink_bucket),
                Some(measurement_name),
            ] => Ok(Self {
                sink_url,
                sink_token,
                sink_org,
                sink_bucket,
                measurement_name,
                target_device_identity: value(DEVICE_ID),
            }),
            values => Err(ConfigError::Missing(
                REQUIRED_KEYS
                    .into_iter()
                    .zip(values)
                    .filter_map(|(key, found)| found.is_none().then_some(key))
                    .collect(),
            )),
        }
    }
}

/// Load a `.env` file from the working directory or one of its parents.
///
/// Variables that are already set keep their value. Returns the file that
/// was loaded, or `None` when there is no such file.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    found(dotenvy::dotenv())
}

/// Load variables from the env file at `path`, as [`load_dotenv`] does.
pub fn load_env_file(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    found(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn found(result: Result<PathBuf, dotenvy::Error>) -> Result<Option<PathBuf>, dotenvy::Error> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(error) if error.not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Read `key` from the process environment. Non-unicode values count as unset.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl fmt::Debug for RunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfiguration")
            .field("sink_url", &self.sink_url)
            .field("sink_token", &"<redacted>")
            .field("sink_org", &self.sink_org)
            .field("sink_bucket", &self.sink_bucket)
            .field("measurement_name", &self.measurement_name)
            .field("target_device_identity", &self.target_device_identity)
            .finish()
    }
}
