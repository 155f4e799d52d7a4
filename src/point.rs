//! Measurement points and their InfluxDB line protocol rendering.

use crate::device::DiscoveredDevice;
use std::collections::BTreeMap;
use std::fmt;

pub const TAG_DEVICE_ID: &str = "device_id";
pub const TAG_FRIENDLY_NAME: &str = "friendly_name";
pub const FIELD_TEMPERATURE: &str = "temperature";
pub const FIELD_HUMIDITY: &str = "humidity";
pub const FIELD_BATTERY: &str = "battery";

/// Field values for InfluxDB line protocol
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// A single record bound for the time-series database.
///
/// Built once from a [`DiscoveredDevice`] and never mutated afterwards. No
/// timestamp is attached; the database stamps the point on arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
}

impl MeasurementPoint {
    /// Map a device reading onto a point named `measurement`.
    ///
    /// `battery` is only present in the point when the reading has one.
    pub fn from_device(measurement: &str, device: &DiscoveredDevice) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_DEVICE_ID.to_string(), device.identity.clone());
        tags.insert(TAG_FRIENDLY_NAME.to_string(), device.display_name.clone());

        let reading = &device.reading;
        let mut fields = BTreeMap::new();
        fields.insert(
            FIELD_TEMPERATURE.to_string(),
            FieldValue::Float(reading.temperature),
        );
        fields.insert(
            FIELD_HUMIDITY.to_string(),
            FieldValue::Integer(i64::from(reading.humidity)),
        );
        if let Some(battery) = reading.battery {
            fields.insert(
                FIELD_BATTERY.to_string(),
                FieldValue::Integer(i64::from(battery)),
            );
        }

        Self {
            measurement: measurement.to_string(),
            tags,
            fields,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }
}

// Measurement names may not contain unescaped commas or spaces.
fn escape_measurement(src: &str, fmt: &mut fmt::Formatter) -> fmt::Result {
    escape(src, &[',', ' '], fmt)
}

// Tag keys, tag values and field keys additionally escape `=`.
fn escape_key(src: &str, fmt: &mut fmt::Formatter) -> fmt::Result {
    escape(src, &[',', '=', ' '], fmt)
}

fn escape(src: &str, special: &[char], fmt: &mut fmt::Formatter) -> fmt::Result {
    for c in src.chars() {
        if special.contains(&c) {
            write!(fmt, "\\")?;
        }
        write!(fmt, "{c}")?;
    }
    Ok(())
}

fn fmt_tags(point: &MeasurementPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in point.tags.iter() {
        write!(fmt, ",")?;
        escape_key(key, fmt)?;
        write!(fmt, "=")?;
        escape_key(value, fmt)?;
    }
    Ok(())
}

fn fmt_fields(point: &MeasurementPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in point.fields.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        escape_key(key, fmt)?;
        write!(fmt, "={value}")?;
    }
    Ok(())
}

impl fmt::Display for MeasurementPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        escape_measurement(&self.measurement, fmt)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)
    }
}
