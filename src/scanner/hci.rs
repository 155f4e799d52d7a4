//! Raw HCI socket backend for SwitchBot scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! SwitchBot meters put their service data in the scan response, so the
//! controller is switched to active scanning for the duration of the run.

use super::{
    AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_16, ADVERTISEMENT_CHANNEL_BUFFER_SIZE,
    Advertisement, ScanError,
};
use crate::mac_address::MacAddress;
use crate::switchbot::{MANUFACTURER_ID, SERVICE_UUIDS};
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// Socket options
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV_ID: u16 = 0;

// Packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// Events
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// LE controller commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_ACTIVE: u8 = 0x01;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// 10ms in 0.625ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

const MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(socket)
    }

    /// Only let LE meta events through.
    fn set_event_filter(&self) -> Result<(), ScanError> {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                &filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }

        Ok(())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(ogf, ocf, params);
        let ret = unsafe {
            libc::write(self.as_raw_fd(), packet.as_ptr() as *const c_void, packet.len())
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }

        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret =
            unsafe { libc::read(self.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// LE scanning that is switched off again when dropped.
struct ActiveScan {
    socket: HciSocket,
}

impl ActiveScan {
    fn start(socket: HciSocket) -> Result<Self, ScanError> {
        socket.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
        socket.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &scan_enable(true))?;
        Ok(Self { socket })
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        let disable = scan_enable(false);
        if let Err(error) = self.socket.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &disable) {
            debug!(%error, "failed to disable LE scan");
        }
    }
}

fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let [opcode_lo, opcode_hi] = ((ogf << 10) | ocf).to_le_bytes();
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.extend_from_slice(&[HCI_COMMAND_PKT, opcode_lo, opcode_hi, params.len() as u8]);
    packet.extend_from_slice(params);
    packet
}

fn scan_parameters() -> [u8; 7] {
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        LE_SCAN_ACTIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

fn scan_enable(enable: bool) -> [u8; 2] {
    // Second byte: don't filter duplicates, readings change between adverts.
    [u8::from(enable), 0x00]
}

/// Extract SwitchBot advertisements from an LE advertising report event.
///
/// Each report is `event_type, addr_type, addr[6], data_len, data, rssi`.
/// Truncated reports end parsing; earlier complete reports are kept.
fn parse_advertising_event(event: &[u8]) -> Vec<Advertisement> {
    let mut advertisements = Vec::new();

    let Some(&[HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, num_reports]) =
        event.get(..5)
    else {
        return advertisements;
    };

    let mut rest = &event[5..];
    for _ in 0..num_reports {
        let Some((header, tail)) = rest.split_at_checked(9) else {
            break;
        };
        let Some((data, tail)) = tail.split_at_checked(usize::from(header[8])) else {
            break;
        };

        let mut addr = [0u8; 6];
        addr.copy_from_slice(&header[2..8]);
        if let Some(advertisement) = parse_ad_structures(MacAddress::from_le_bytes(addr), data) {
            advertisements.push(advertisement);
        }

        // Skip RSSI
        rest = tail.get(1..).unwrap_or_default();
    }

    advertisements
}

/// Pick SwitchBot service and manufacturer data out of AD structures.
fn parse_ad_structures(address: MacAddress, data: &[u8]) -> Option<Advertisement> {
    let mut service_data = None;
    let mut manufacturer_data = None;

    let mut rest = data;
    while let [len, tail @ ..] = rest {
        let len = usize::from(*len);
        if len == 0 || tail.len() < len {
            break;
        }
        let (structure, next) = tail.split_at(len);
        rest = next;

        match structure {
            [AD_TYPE_SERVICE_DATA_16, lo, hi, payload @ ..]
                if SERVICE_UUIDS.contains(&u16::from_le_bytes([*lo, *hi])) =>
            {
                service_data = Some(payload.to_vec());
            }
            [AD_TYPE_MANUFACTURER_DATA, lo, hi, payload @ ..]
                if u16::from_le_bytes([*lo, *hi]) == MANUFACTURER_ID =>
            {
                manufacturer_data = Some(payload.to_vec());
            }
            _ => {}
        }
    }

    if service_data.is_none() && manufacturer_data.is_none() {
        return None;
    }

    Some(Advertisement {
        address,
        service_data,
        manufacturer_data,
    })
}

/// Start an active LE scan on hci0 and stream SwitchBot advertisements.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let events = HciSocket::open(HCI_DEV_ID)?;
    events.set_event_filter()?;

    // Commands go through a separate socket so the event filter stays narrow.
    let scan = ActiveScan::start(HciSocket::open(HCI_DEV_ID)?)?;

    let async_fd = AsyncFd::new(events)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _scan = scan;
        let mut buf = [0u8; MAX_EVENT_SIZE];

        loop {
            let mut guard = tokio::select! {
                _ = tx.closed() => return,
                ready = async_fd.readable() => match ready {
                    Ok(guard) => guard,
                    Err(error) => {
                        warn!(%error, "HCI socket failed");
                        return;
                    }
                },
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(error)) => {
                        warn!(%error, "failed to read from HCI socket");
                        return;
                    }
                    Err(_would_block) => break,
                };

                for advertisement in parse_advertising_event(&buf[..n]) {
                    if tx.send(advertisement).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;

    // TEST_MAC as it appears on the wire
    const TEST_MAC_LE: [u8; 6] = [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA];

    fn report(addr: [u8; 6], data: &[u8]) -> Vec<u8> {
        let mut report = vec![0x04, 0x00];
        report.extend_from_slice(&addr);
        report.push(data.len() as u8);
        report.extend_from_slice(data);
        report.push(0xC4); // RSSI
        report
    }

    fn event(reports: &[Vec<u8>]) -> Vec<u8> {
        let body = reports.concat();
        let mut event = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (body.len() + 2) as u8,
            EVT_LE_ADVERTISING_REPORT,
            reports.len() as u8,
        ];
        event.extend(body);
        event
    }

    fn meter_scan_response() -> Vec<u8> {
        vec![
            0x02, 0x01, 0x06, // Flags
            0x09, 0x16, 0x3D, 0xFD, 0x54, 0x00, 0x5A, 0x05, 0x99, 0x3C, // Service data 0xFD3D
        ]
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
        assert_eq!(filter.event_mask[0], 0);
    }

    #[test]
    fn test_command_packet() {
        let packet = command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &scan_enable(true));
        // Opcode 0x200C, little-endian
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_parameters_are_active() {
        assert_eq!(
            scan_parameters(),
            [0x01, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]
        );
        assert_eq!(scan_enable(false), [0x00, 0x00]);
    }

    #[test]
    fn test_parse_service_data_report() {
        let advertisements = parse_advertising_event(&event(&[report(
            TEST_MAC_LE,
            &meter_scan_response(),
        )]));

        assert_eq!(
            advertisements,
            vec![Advertisement {
                address: TEST_MAC,
                service_data: Some(vec![0x54, 0x00, 0x5A, 0x05, 0x99, 0x3C]),
                manufacturer_data: None,
            }]
        );
    }

    #[test]
    fn test_parse_manufacturer_data_report() {
        let data = [0x06, 0xFF, 0x69, 0x09, 0x01, 0x02, 0x03];
        let advertisements = parse_advertising_event(&event(&[report(TEST_MAC_LE, &data)]));

        assert_eq!(advertisements.len(), 1);
        assert_eq!(advertisements[0].service_data, None);
        assert_eq!(
            advertisements[0].manufacturer_data,
            Some(vec![0x01, 0x02, 0x03])
        );
    }

    #[test]
    fn test_parse_multiple_reports_skips_foreign_devices() {
        let apple = [0x05, 0xFF, 0x4C, 0x00, 0x10, 0x05];
        let other = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let advertisements = parse_advertising_event(&event(&[
            report(other, &apple),
            report(TEST_MAC_LE, &meter_scan_response()),
        ]));

        assert_eq!(advertisements.len(), 1);
        assert_eq!(advertisements[0].address, TEST_MAC);
    }

    #[test]
    fn test_parse_legacy_service_uuid() {
        let data = [0x04, 0x16, 0x00, 0x0D, 0x54];
        let advertisements = parse_advertising_event(&event(&[report(TEST_MAC_LE, &data)]));
        assert_eq!(advertisements[0].service_data, Some(vec![0x54]));
    }

    #[test]
    fn test_parse_ignores_other_events() {
        let mut other = event(&[report(TEST_MAC_LE, &meter_scan_response())]);
        other[3] = 0x01; // LE connection complete
        assert!(parse_advertising_event(&other).is_empty());
        assert!(parse_advertising_event(&[HCI_EVENT_PKT]).is_empty());
    }

    #[test]
    fn test_parse_truncated_report() {
        let mut truncated = event(&[report(TEST_MAC_LE, &meter_scan_response())]);
        truncated.truncate(12);
        assert!(parse_advertising_event(&truncated).is_empty());
    }

    #[test]
    fn test_parse_malformed_ad_length() {
        // Length byte claims more data than present
        let data = [0x09, 0x16, 0x3D, 0xFD, 0x54];
        assert_eq!(parse_ad_structures(TEST_MAC, &data), None);
    }
}
