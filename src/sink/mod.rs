//! Destinations for measurement points.

pub mod influxdb;

use crate::point::MeasurementPoint;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub use influxdb::InfluxDbSink;

/// Errors returned by a sink write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The request never got a response (connection refused, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success status
    #[error("server rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The client could not be set up
    #[error("invalid sink configuration: {0}")]
    Setup(String),
}

/// Boxed future returned by [`PointSink::write`].
pub type WriteFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>>;

/// Sink abstraction to enable deterministic unit tests without a database.
pub trait PointSink: Send + Sync {
    /// Store one point in `bucket` of `org`.
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        org: &'a str,
        point: &'a MeasurementPoint,
    ) -> WriteFuture<'a>;
}

impl<T: PointSink + ?Sized> PointSink for &T {
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        org: &'a str,
        point: &'a MeasurementPoint,
    ) -> WriteFuture<'a> {
        (**self).write(bucket, org, point)
    }
}
