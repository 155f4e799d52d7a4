//! SwitchBot thermo-hygrometer advertisement decoding.
//!
//! Byte layouts follow the SwitchBot BLE API documentation:
//! <https://github.com/OpenWonderLabs/SwitchBotAPI-BLE>. The model is
//! identified by the first byte of the service data; readings come from the
//! service data on older meters and from the manufacturer data on newer ones.

use crate::device::{DiscoveredDevice, Reading};
use crate::scanner::{Advertisement, DecodeError};

/// SwitchBot (Woan Technology) Bluetooth company identifier.
pub const MANUFACTURER_ID: u16 = 0x0969;

/// 16-bit service data UUIDs, current first.
pub const SERVICE_UUIDS: [u16; 2] = [0xfd3d, 0x0d00];

/// Thermo-hygrometer models with a decodable reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Meter,
    MeterPlus,
    OutdoorMeter,
    MeterPro,
    MeterProCo2,
    Hub2,
}

impl DeviceType {
    /// Look up the model from the first service data byte.
    pub fn from_model(model: u8) -> Option<Self> {
        match model & 0x7f {
            b'T' => Some(DeviceType::Meter),
            b'i' => Some(DeviceType::MeterPlus),
            b'w' => Some(DeviceType::OutdoorMeter),
            b'4' => Some(DeviceType::MeterPro),
            b'5' => Some(DeviceType::MeterProCo2),
            b'v' => Some(DeviceType::Hub2),
            _ => None,
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            DeviceType::Meter => "Meter",
            DeviceType::MeterPlus => "Meter Plus",
            DeviceType::OutdoorMeter => "Indoor/Outdoor Meter",
            DeviceType::MeterPro => "Meter Pro",
            DeviceType::MeterProCo2 => "Meter Pro CO2",
            DeviceType::Hub2 => "Hub 2",
        }
    }
}

/// Decode a merged advertisement into a [`DiscoveredDevice`].
///
/// Returns [`DecodeError::NotSwitchBot`] for advertisements without SwitchBot
/// service data so callers can drop them quietly.
pub fn decode_advertisement(
    advertisement: &Advertisement,
) -> Result<DiscoveredDevice, DecodeError> {
    let service_data = advertisement
        .service_data
        .as_deref()
        .ok_or(DecodeError::NotSwitchBot)?;

    let &model = service_data.first().ok_or(DecodeError::NotSwitchBot)?;
    let device_type =
        DeviceType::from_model(model).ok_or(DecodeError::UnsupportedModel(model & 0x7f))?;

    let reading = decode_reading(
        device_type,
        service_data,
        advertisement.manufacturer_data.as_deref(),
    )?;

    Ok(DiscoveredDevice {
        identity: advertisement.address.to_string(),
        display_name: device_type.friendly_name().to_string(),
        reading,
    })
}

fn decode_reading(
    device_type: DeviceType,
    service_data: &[u8],
    manufacturer_data: Option<&[u8]>,
) -> Result<Reading, DecodeError> {
    match device_type {
        DeviceType::Meter | DeviceType::MeterPlus if service_data.len() >= 6 => {
            decode_climate(&service_data[3..6], battery(service_data))
        }
        DeviceType::Meter | DeviceType::MeterPlus => {
            decode_climate(manufacturer_range(device_type, manufacturer_data, 8)?, None)
        }
        DeviceType::OutdoorMeter | DeviceType::MeterPro | DeviceType::MeterProCo2 => {
            decode_climate(
                manufacturer_range(device_type, manufacturer_data, 8)?,
                battery(service_data),
            )
        }
        DeviceType::Hub2 => {
            decode_climate(manufacturer_range(device_type, manufacturer_data, 13)?, None)
        }
    }
}

fn battery(service_data: &[u8]) -> Option<u8> {
    service_data.get(2).map(|b| b & 0x7f)
}

/// Three climate bytes starting at `offset` in the manufacturer data.
fn manufacturer_range(
    device_type: DeviceType,
    manufacturer_data: Option<&[u8]>,
    offset: usize,
) -> Result<&[u8], DecodeError> {
    let data = manufacturer_data.ok_or_else(|| {
        DecodeError::InvalidData(format!(
            "{} advertisement has no manufacturer data",
            device_type.friendly_name()
        ))
    })?;

    data.get(offset..offset + 3).ok_or_else(|| {
        DecodeError::InvalidData(format!(
            "{} manufacturer data too short: expected at least {} bytes, got {}",
            device_type.friendly_name(),
            offset + 3,
            data.len()
        ))
    })
}

/// Decode `[tenths, units|sign, humidity]`.
fn decode_climate(bytes: &[u8], battery: Option<u8>) -> Result<Reading, DecodeError> {
    let &[fraction, integral, humidity] = bytes else {
        return Err(DecodeError::InvalidData(format!(
            "expected 3 climate bytes, got {}",
            bytes.len()
        )));
    };

    let tenths = i32::from(integral & 0x7f) * 10 + i32::from(fraction & 0x0f);
    let sign = if integral & 0x80 != 0 { 1 } else { -1 };
    let temperature = f64::from(sign * tenths) / 10.0;

    let humidity = humidity & 0x7f;
    if humidity > 100 {
        return Err(DecodeError::InvalidData(format!(
            "humidity out of range: expected 0-100, got {humidity}"
        )));
    }

    Ok(Reading {
        temperature,
        humidity,
        battery,
    })
}
