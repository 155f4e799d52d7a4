//! Decoded sensor devices as handed over by discovery.

use std::collections::BTreeMap;

/// Latest telemetry decoded from a thermo-hygrometer advertisement.
///
/// Temperature and humidity are always reported. Battery level depends on
/// the model: mains powered hubs do not advertise one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent (0-100)
    pub humidity: u8,
    /// Battery level in percent (0-100)
    pub battery: Option<u8>,
}

/// A sensor found during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    /// Hardware address, e.g. `AA:BB:CC:DD:EE:FF`
    pub identity: String,
    /// Model name, e.g. `Meter Plus`
    pub display_name: String,
    pub reading: Reading,
}

/// Scan result keyed by device identity.
pub type DiscoveryResult = BTreeMap<String, DiscoveredDevice>;
