//! Filter-and-write pipeline for one scan result.
//!
//! A run goes through `Discovered -> {Skipped | Selected} -> {Written |
//! WriteFailed}`. An empty scan ends the run before any device is evaluated.
//! Write failures are reported and counted but never escape this module.

use crate::config::RunConfiguration;
use crate::device::{DiscoveredDevice, DiscoveryResult};
use crate::point::MeasurementPoint;
use crate::report::{PipelineEvent, Reporter};
use crate::selector;
use crate::sink::PointSink;

/// How a completed run ended. Every variant is a normal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Discovery found nothing, no device was evaluated.
    NoDevices,
    /// Devices were evaluated; counts per terminal state.
    Completed {
        skipped: usize,
        written: usize,
        failed: usize,
    },
}

/// Result of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    WriteFailed,
}

/// Select the target from `devices` and write one point per selected device.
pub async fn process(
    devices: &DiscoveryResult,
    config: &RunConfiguration,
    sink: &dyn PointSink,
    reporter: &dyn Reporter,
) -> RunOutcome {
    if devices.is_empty() {
        reporter.report(PipelineEvent::NoDevices);
        return RunOutcome::NoDevices;
    }

    let selected = selector::select(
        devices,
        config.target_device_identity.as_deref(),
        reporter,
    );
    let skipped = devices.len() - selected.len();

    let mut written = 0;
    let mut failed = 0;
    for device in selected {
        match write_device(device, config, sink, reporter).await {
            WriteStatus::Written => written += 1,
            WriteStatus::WriteFailed => failed += 1,
        }
    }

    RunOutcome::Completed {
        skipped,
        written,
        failed,
    }
}

/// Build the point for `device` and hand it to `sink`.
///
/// A sink failure is reported as [`PipelineEvent::WriteFailed`] and turned
/// into [`WriteStatus::WriteFailed`] so callers can carry on with the next
/// device.
pub async fn write_device(
    device: &DiscoveredDevice,
    config: &RunConfiguration,
    sink: &dyn PointSink,
    reporter: &dyn Reporter,
) -> WriteStatus {
    reporter.report(PipelineEvent::Selected(device.clone()));

    let point = MeasurementPoint::from_device(&config.measurement_name, device);
    match sink
        .write(&config.sink_bucket, &config.sink_org, &point)
        .await
    {
        Ok(()) => {
            reporter.report(PipelineEvent::Written {
                identity: device.identity.clone(),
            });
            WriteStatus::Written
        }
        Err(cause) => {
            reporter.report(PipelineEvent::WriteFailed {
                identity: device.identity.clone(),
                cause,
            });
            WriteStatus::WriteFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FIELD_BATTERY, FIELD_HUMIDITY, FIELD_TEMPERATURE, FieldValue};
    use crate::sink::WriteError;
    use crate::test_utils::{
        FakeSink, RecordingReporter, device, device_without_battery, discovery_result,
    };

    fn config(target: Option<&str>) -> RunConfiguration {
        RunConfiguration {
            sink_url: "http://localhost:8086".to_string(),
            sink_token: "test_token".to_string(),
            sink_org: "test_org".to_string(),
            sink_bucket: "test_bucket".to_string(),
            measurement_name: "test_measurement".to_string(),
            target_device_identity: target.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_matching_device_is_written() {
        let devices = discovery_result([device("AA:BB", "Meter")]);
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        let outcome = process(&devices, &config(Some("AA:BB")), &sink, &reporter).await;

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                skipped: 0,
                written: 1,
                failed: 0
            }
        );

        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        let (bucket, org, point) = &writes[0];
        assert_eq!(bucket, "test_bucket");
        assert_eq!(org, "test_org");
        assert_eq!(point.measurement(), "test_measurement");
        assert_eq!(point.tag("device_id"), Some("AA:BB"));
        assert_eq!(point.tag("friendly_name"), Some("Meter"));
        assert_eq!(point.field(FIELD_TEMPERATURE), Some(FieldValue::Float(25.5)));
        assert_eq!(point.field(FIELD_HUMIDITY), Some(FieldValue::Integer(60)));
        assert_eq!(point.field(FIELD_BATTERY), Some(FieldValue::Integer(90)));

        assert_eq!(
            reporter.events(),
            vec![
                PipelineEvent::Selected(device("AA:BB", "Meter")),
                PipelineEvent::Written {
                    identity: "AA:BB".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_discovery_short_circuits() {
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        let outcome = process(
            &DiscoveryResult::new(),
            &config(Some("AA:BB")),
            &sink,
            &reporter,
        )
        .await;

        assert_eq!(outcome, RunOutcome::NoDevices);
        assert!(sink.writes().is_empty());
        assert_eq!(reporter.events(), vec![PipelineEvent::NoDevices]);
    }

    #[tokio::test]
    async fn test_no_match_writes_nothing() {
        let devices = discovery_result([device("XX", "Meter")]);
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        let outcome = process(&devices, &config(Some("YY")), &sink, &reporter).await;

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                skipped: 1,
                written: 0,
                failed: 0
            }
        );
        assert!(sink.writes().is_empty());
        assert_eq!(
            reporter.events(),
            vec![PipelineEvent::Skipped {
                identity: "XX".to_string(),
                target: Some("YY".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_n_devices_one_match() {
        let devices = discovery_result((0..7).map(|i| device(&format!("DEV{i}"), "Meter")));
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        let outcome = process(&devices, &config(Some("DEV4")), &sink, &reporter).await;

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                skipped: 6,
                written: 1,
                failed: 0
            }
        );
        assert_eq!(sink.writes().len(), 1);
        let skips = reporter
            .events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Skipped { .. }))
            .count();
        assert_eq!(skips, 6);
    }

    #[tokio::test]
    async fn test_missing_battery_is_omitted() {
        let devices = discovery_result([device_without_battery("AA:BB", "Hub 2")]);
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        process(&devices, &config(Some("AA:BB")), &sink, &reporter).await;

        let (_, _, point) = &sink.writes()[0];
        assert_eq!(point.field(FIELD_BATTERY), None);
        assert_eq!(point.fields().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated() {
        let devices = discovery_result([device("T", "Meter")]);
        let cause = WriteError::Transport("connection refused".to_string());
        let sink = FakeSink::failing(cause.clone());
        let reporter = RecordingReporter::default();

        let outcome = process(&devices, &config(Some("T")), &sink, &reporter).await;

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                skipped: 0,
                written: 0,
                failed: 1
            }
        );
        assert_eq!(sink.writes().len(), 1);
        assert_eq!(
            reporter.events().last(),
            Some(&PipelineEvent::WriteFailed {
                identity: "T".to_string(),
                cause,
            })
        );
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_next_device() {
        let sink = FakeSink::failing(WriteError::Rejected {
            status: 500,
            body: "internal error".to_string(),
        });
        let reporter = RecordingReporter::default();
        let config = config(None);

        let first = write_device(&device("A", "Meter"), &config, &sink, &reporter).await;
        let second = write_device(&device("B", "Meter"), &config, &sink, &reporter).await;

        assert_eq!(first, WriteStatus::WriteFailed);
        assert_eq!(second, WriteStatus::WriteFailed);
        assert_eq!(sink.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_independent() {
        let devices = discovery_result([device("AA:BB", "Meter")]);
        let config = config(Some("AA:BB"));
        let sink = FakeSink::default();
        let reporter = RecordingReporter::default();

        let first = process(&devices, &config, &sink, &reporter).await;
        let second = process(&devices, &config, &sink, &reporter).await;

        assert_eq!(first, second);
        let writes = sink.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
    }
}
