//! BLE discovery of SwitchBot sensors.
//!
//! Backends stream raw [`Advertisement`]s through a channel. [`discover`]
//! listens for a bounded time, merges what each address sent (readings and
//! scan responses arrive separately) and decodes the result.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::device::DiscoveryResult;
use crate::mac_address::MacAddress;
use crate::switchbot::decode_advertisement;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Error types for decoding SwitchBot advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Advertisement carries no SwitchBot service data
    #[error("Not a SwitchBot advertisement")]
    NotSwitchBot,
    /// SwitchBot device without a temperature/humidity reading
    #[error("Unsupported SwitchBot model: 0x{0:02x}")]
    UnsupportedModel(u8),
    /// Invalid or truncated data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Manufacturer data type in BLE advertising payloads (AD type 0xFF)
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xff;

/// 16-bit UUID service data in BLE advertising payloads (AD type 0x16)
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Channel buffer size for advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// SwitchBot relevant parts of one advertising report.
///
/// Both payloads exclude their identifier: service data starts after the
/// UUID, manufacturer data after the company id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,
    pub service_data: Option<Vec<u8>>,
    pub manufacturer_data: Option<Vec<u8>>,
}

impl Advertisement {
    /// Fold a later report from the same address into this one.
    ///
    /// Payloads present in `newer` replace the stored ones; absent payloads
    /// keep the last value seen.
    pub fn merge(&mut self, newer: Advertisement) {
        if newer.service_data.is_some() {
            self.service_data = newer.service_data;
        }
        if newer.manufacturer_data.is_some() {
            self.manufacturer_data = newer.manufacturer_data;
        }
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Start streaming advertisements from the selected backend.
///
/// The backend stops once the returned receiver is dropped.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}

/// Scan for `scan_timeout` and return every decodable SwitchBot sensor.
///
/// An empty result is not an error. Only failing to bring up the Bluetooth
/// backend is.
pub async fn discover(
    backend: Backend,
    scan_timeout: Duration,
) -> Result<DiscoveryResult, ScanError> {
    debug!(%backend, ?scan_timeout, "starting scan");
    let advertisements = start_scan(backend).await?;
    let seen = collect_advertisements(advertisements, scan_timeout).await;
    debug!(addresses = seen.len(), "scan finished");
    Ok(decode_all(seen.into_values()))
}

/// Merge advertisements per address until `scan_timeout` elapses or the
/// backend closes the channel.
pub async fn collect_advertisements(
    mut advertisements: mpsc::Receiver<Advertisement>,
    scan_timeout: Duration,
) -> BTreeMap<MacAddress, Advertisement> {
    let mut seen: BTreeMap<MacAddress, Advertisement> = BTreeMap::new();

    let deadline = tokio::time::sleep(scan_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            received = advertisements.recv() => match received {
                Some(advertisement) => match seen.get_mut(&advertisement.address) {
                    Some(known) => known.merge(advertisement),
                    None => {
                        seen.insert(advertisement.address, advertisement);
                    }
                },
                None => break,
            },
        }
    }

    seen
}

/// Decode merged advertisements, keyed by device identity.
///
/// Foreign devices are dropped silently; SwitchBot devices that fail to
/// decode are logged at debug level.
pub fn decode_all(advertisements: impl IntoIterator<Item = Advertisement>) -> DiscoveryResult {
    let mut devices = DiscoveryResult::new();

    for advertisement in advertisements {
        match decode_advertisement(&advertisement) {
            Ok(device) => {
                devices.insert(device.identity.clone(), device);
            }
            Err(DecodeError::NotSwitchBot) => {}
            Err(error) => {
                debug!(address = %advertisement.address, %error, "ignoring advertisement")
            }
        }
    }

    devices
}
