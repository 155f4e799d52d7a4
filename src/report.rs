//! Run notifications.
//!
//! The pipeline never logs on its own. It hands [`PipelineEvent`]s to a
//! [`Reporter`], which lets tests record exactly what a run announced.

use crate::device::DiscoveredDevice;
use crate::sink::WriteError;
use tracing::{error, info};

/// Something worth telling the operator about during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The scan returned no sensors at all.
    NoDevices,
    /// A sensor was seen but is not the configured target.
    Skipped {
        identity: String,
        target: Option<String>,
    },
    /// The target sensor was found and will be written.
    Selected(DiscoveredDevice),
    /// The point for `identity` was accepted by the sink.
    Written { identity: String },
    /// The sink rejected or failed the write for `identity`.
    WriteFailed { identity: String, cause: WriteError },
}

/// Receiver for pipeline notifications.
pub trait Reporter: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::NoDevices => info!("no temperature sensors found"),
            PipelineEvent::Skipped { identity, target } => info!(
                device_id = %identity,
                target = target.as_deref().unwrap_or("<unset>"),
                "skipping device that does not match DEVICE_ID"
            ),
            PipelineEvent::Selected(device) => info!(
                device_id = %device.identity,
                friendly_name = %device.display_name,
                temperature = device.reading.temperature,
                humidity = device.reading.humidity,
                battery = ?device.reading.battery,
                "found target device"
            ),
            PipelineEvent::Written { identity } => {
                info!(device_id = %identity, "data written to InfluxDB")
            }
            PipelineEvent::WriteFailed { identity, cause } => {
                error!(device_id = %identity, error = %cause, "error writing to InfluxDB")
            }
        }
    }
}
