//! Narrowing a scan result down to the configured target device.

use crate::device::{DiscoveredDevice, DiscoveryResult};
use crate::report::{PipelineEvent, Reporter};

/// Pick the devices whose identity equals `target`.
///
/// Every device is evaluated, so each non-matching one produces a
/// [`PipelineEvent::Skipped`] in iteration order. Identities are exact,
/// case-sensitive strings. Since identities are unique keys, at most one
/// device is returned.
pub fn select<'a>(
    devices: &'a DiscoveryResult,
    target: Option<&str>,
    reporter: &dyn Reporter,
) -> Vec<&'a DiscoveredDevice> {
    let mut selected = Vec::new();

    for (identity, device) in devices {
        if Some(identity.as_str()) == target {
            selected.push(device);
        } else {
            reporter.report(PipelineEvent::Skipped {
                identity: identity.clone(),
                target: target.map(str::to_string),
            });
        }
    }

    selected
}
