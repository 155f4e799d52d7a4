use crate::device::{DiscoveredDevice, DiscoveryResult, Reading};
use crate::mac_address::MacAddress;
use crate::point::MeasurementPoint;
use crate::report::{PipelineEvent, Reporter};
use crate::sink::{PointSink, WriteError, WriteFuture};
use std::sync::Mutex;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build a device reporting 25.5 °C, 60 % humidity and 90 % battery.
pub fn device(identity: &str, display_name: &str) -> DiscoveredDevice {
    DiscoveredDevice {
        identity: identity.to_string(),
        display_name: display_name.to_string(),
        reading: Reading {
            temperature: 25.5,
            humidity: 60,
            battery: Some(90),
        },
    }
}

/// Same as [`device`] but without a battery level.
pub fn device_without_battery(identity: &str, display_name: &str) -> DiscoveredDevice {
    let mut device = device(identity, display_name);
    device.reading.battery = None;
    device
}

/// Key devices by identity the way discovery does.
pub fn discovery_result(devices: impl IntoIterator<Item = DiscoveredDevice>) -> DiscoveryResult {
    devices
        .into_iter()
        .map(|d| (d.identity.clone(), d))
        .collect()
}

/// Reporter that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Sink that records every point and optionally fails each write.
#[derive(Debug, Default)]
pub struct FakeSink {
    writes: Mutex<Vec<(String, String, MeasurementPoint)>>,
    failure: Option<WriteError>,
}

impl FakeSink {
    pub fn failing(error: WriteError) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    /// `(bucket, org, point)` for every attempted write.
    pub fn writes(&self) -> Vec<(String, String, MeasurementPoint)> {
        self.writes.lock().unwrap().clone()
    }
}

impl PointSink for FakeSink {
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        org: &'a str,
        point: &'a MeasurementPoint,
    ) -> WriteFuture<'a> {
        self.writes
            .lock()
            .unwrap()
            .push((bucket.to_string(), org.to_string(), point.clone()));
        let result = match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }
}
