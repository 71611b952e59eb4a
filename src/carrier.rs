//! USB carrier: the framed byte pipe between host and probe.
//!
//! One `write` carries exactly one CMSIS-DAP command, one `read` returns
//! exactly one response. Everything above this seam is transport logic;
//! everything below it is USB plumbing.

use std::time::Duration;

use crate::error::TransportError;

/// Bidirectional framed byte pipe to a CMSIS-DAP probe.
///
/// Implementations must preserve command/response framing: a single `write`
/// must reach the probe as one command packet, and a single `read` must
/// return one complete response packet.
pub trait UsbCarrier {
    /// Write `buf` to the probe, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read one response from the probe into `buf`, returning its length.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Known CMSIS-DAP bulk probes, tried in order: `(VID, PID, interface)`.
const PROBE_TABLE: &[(u16, u16, u8)] = &[(0x1fc9, 0x0143, 0), (0x2e8a, 0x000c, 42)];

const USB_TIMEOUT: Duration = Duration::from_millis(100);

/// CMSIS-DAP v2 probe on a pair of USB bulk endpoints.
pub struct BulkCarrier {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    out_ep: u8,
    in_ep: u8,
}

impl BulkCarrier {
    /// Open the first probe from the known-device table.
    pub fn open() -> Result<Self, TransportError> {
        for &(vid, pid, interface) in PROBE_TABLE {
            match Self::open_device(vid, pid, interface) {
                Ok(carrier) => {
                    tracing::debug!("opened probe {:04x}:{:04x} interface {}", vid, pid, interface);
                    return Ok(carrier);
                }
                Err(e) => {
                    tracing::trace!("probe {:04x}:{:04x} not available: {:?}", vid, pid, e);
                }
            }
        }
        tracing::error!("cannot find debug probe");
        Err(TransportError::Offline)
    }

    fn open_device(vid: u16, pid: u16, interface: u8) -> Result<Self, TransportError> {
        let handle =
            rusb::open_device_with_vid_pid(vid, pid).ok_or(TransportError::Offline)?;
        handle
            .claim_interface(interface)
            .map_err(|_| TransportError::Offline)?;

        let (out_ep, in_ep) =
            Self::find_bulk_endpoints(handle.device(), interface).ok_or(TransportError::Offline)?;

        Ok(Self {
            handle,
            out_ep,
            in_ep,
        })
    }

    /// Locate the bulk OUT/IN endpoint pair on the claimed interface.
    fn find_bulk_endpoints(
        device: rusb::Device<rusb::GlobalContext>,
        interface: u8,
    ) -> Option<(u8, u8)> {
        let config = device.active_config_descriptor().ok()?;
        for desc in config.interfaces() {
            if desc.number() != interface {
                continue;
            }
            for setting in desc.descriptors() {
                let mut out_ep = None;
                let mut in_ep = None;
                for ep in setting.endpoint_descriptors() {
                    if ep.transfer_type() != rusb::TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        rusb::Direction::Out if out_ep.is_none() => out_ep = Some(ep.address()),
                        rusb::Direction::In if in_ep.is_none() => in_ep = Some(ep.address()),
                        _ => {}
                    }
                }
                if let (Some(out_ep), Some(in_ep)) = (out_ep, in_ep) {
                    return Some((out_ep, in_ep));
                }
            }
        }
        None
    }
}

impl UsbCarrier for BulkCarrier {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(self.out_ep, buf, USB_TIMEOUT)
            .map_err(|e| {
                tracing::error!("usb write error: {}", e);
                TransportError::Io
            })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.handle
            .read_bulk(self.in_ep, buf, USB_TIMEOUT)
            .map_err(|e| {
                tracing::error!("usb read error: {}", e);
                TransportError::Io
            })
    }
}
