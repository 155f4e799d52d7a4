//! BlueZ D-Bus backend for SwitchBot scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, ScanError};
use crate::switchbot::{MANUFACTURER_ID, SERVICE_UUIDS};
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid,
};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Bluetooth base UUID, `0000xxxx-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start an LE discovery session and stream SwitchBot advertisements.
///
/// Discovery reports property changes too, so a sensor that updates its
/// reading during the scan is sent again. The session ends when the returned
/// receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
    let (started_tx, started_rx) = oneshot::channel();

    // The task owns all Bluetooth state so discovery lives exactly as long as
    // someone is listening.
    tokio::spawn(async move {
        let _session = session;

        let events = match adapter.discover_devices_with_changes().await {
            Ok(events) => {
                let _ = started_tx.send(Ok(()));
                events
            }
            Err(e) => {
                let _ = started_tx.send(Err(ScanError::from(e)));
                return;
            }
        };
        futures::pin_mut!(events);

        loop {
            let event = tokio::select! {
                _ = tx.closed() => break,
                event = events.next() => event,
            };
            let address = match event {
                Some(AdapterEvent::DeviceAdded(address)) => address,
                Some(_) => continue,
                None => break,
            };

            match read_advertisement(&adapter, address).await {
                Ok(Some(advertisement)) => {
                    if tx.send(advertisement).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => debug!(%address, %error, "failed to read device properties"),
            }
        }
    });

    started_rx
        .await
        .map_err(|_| ScanError::Bluetooth("discovery task ended before starting".into()))??;

    Ok(rx)
}

/// Read the SwitchBot payloads BlueZ has cached for `address`.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<Advertisement>, bluer::Error> {
    let device = adapter.device(address)?;

    let service_data = device
        .service_data()
        .await?
        .and_then(|data| switchbot_service_data(&data));
    let manufacturer_data = device
        .manufacturer_data()
        .await?
        .and_then(|mut data| data.remove(&MANUFACTURER_ID));

    if service_data.is_none() && manufacturer_data.is_none() {
        return Ok(None);
    }

    Ok(Some(Advertisement {
        address: address.into(),
        service_data,
        manufacturer_data,
    }))
}

fn switchbot_service_data(service_data: &HashMap<Uuid, Vec<u8>>) -> Option<Vec<u8>> {
    SERVICE_UUIDS
        .iter()
        .find_map(|&short| service_data.get(&uuid_from_u16(short)).cloned())
}

/// Expand a 16-bit assigned number to a full UUID.
fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}
