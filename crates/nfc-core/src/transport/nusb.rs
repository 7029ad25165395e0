//! nusb-based PN533 reader.
//!
//! Talks to PN533-family USB readers over their bulk endpoints. Each
//! exchange is a host frame, the reader's ACK frame, then the response
//! frame; blocking endpoint I/O runs on tokio's blocking pool.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::frame::{
    BRTY_106_TYPE_A, BRTY_212_FELICA, CMD_GET_FIRMWARE_VERSION, CMD_IN_DATA_EXCHANGE,
    CMD_IN_LIST_PASSIVE_TARGET, CMD_IN_RELEASE, CMD_IN_SELECT, CMD_RF_CONFIGURATION,
    FELICA_POLLING_REQUEST, ListedTarget, decode_frame, encode_frame, is_ack,
    parse_felica_targets, parse_type_a_targets,
};
use super::traits::{TagReader, TransportError};
use crate::tag::{DetectedTag, TagHandle};

/// (VID, PID) of supported readers: NXP PN533, SCM SCL3711.
pub const SUPPORTED_READERS: [(u16, u16); 2] = [(0x04CC, 0x2533), (0x04E6, 0x5591)];

const READ_BUFFER_LEN: usize = 512;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// RFConfiguration items
const CFG_RF_FIELD: u8 = 0x01;
const CFG_MAX_RETRIES: u8 = 0x05;

/// Bulk endpoint pair of a claimed reader interface.
struct UsbIo {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
}

impl UsbIo {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut reader = ep.reader(4096);
        let mut buf = vec![0u8; max_len];

        let n = reader
            .read(&mut buf)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    /// Send one command frame and return the response data.
    fn exchange(&self, command: u8, params: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.write(&encode_frame(command, params))?;

        let ack = self.read(READ_BUFFER_LEN)?;
        if !is_ack(&ack) {
            // Some firmware skips the ACK and answers directly
            return Ok(decode_frame(&ack, command)?);
        }

        let response = self.read(READ_BUFFER_LEN)?;
        Ok(decode_frame(&response, command)?)
    }
}

/// nusb-based PN533 reader.
pub struct NusbReader {
    io: Arc<UsbIo>,
    vid: u16,
    pid: u16,
}

impl NusbReader {
    /// Whether any supported reader is plugged in.
    pub fn is_supported() -> bool {
        list_devices()
            .wait()
            .map(|mut devices| {
                devices.any(|d| SUPPORTED_READERS.contains(&(d.vendor_id(), d.product_id())))
            })
            .unwrap_or(false)
    }

    /// Open the first supported reader.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if SUPPORTED_READERS.contains(&(device_info.vendor_id(), device_info.product_id())) {
                return Self::open_device_info(device_info);
            }
        }

        let (vid, pid) = SUPPORTED_READERS[0];
        Err(TransportError::DeviceNotFound { vid, pid })
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found reader"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let io = UsbIo {
            interface,
            in_endpoint,
            out_endpoint,
        };

        let version = io.exchange(CMD_GET_FIRMWARE_VERSION, &[])?;
        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            firmware = ?version,
            "Reader opened successfully"
        );

        Ok(Self {
            io: Arc::new(io),
            vid,
            pid,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    async fn call(&self, command: u8, params: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let io = Arc::clone(&self.io);
        tokio::task::spawn_blocking(move || io.exchange(command, &params))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    }

    async fn list_targets(&self, max_targets: u8, brty: u8) -> Result<Vec<ListedTarget>, TransportError> {
        let mut params = vec![max_targets, brty];
        if brty == BRTY_212_FELICA {
            params.extend_from_slice(&FELICA_POLLING_REQUEST);
        }
        let data = self.call(CMD_IN_LIST_PASSIVE_TARGET, params).await?;
        let targets = if brty == BRTY_106_TYPE_A {
            parse_type_a_targets(&data)?
        } else {
            parse_felica_targets(&data)?
        };
        Ok(targets)
    }
}

/// Low six bits of a PN533 status byte carry the error code.
fn check_status(status: u8) -> Result<(), TransportError> {
    match status & 0x3F {
        0x00 => Ok(()),
        // Target released or no longer responding
        0x01 | 0x29 => Err(TransportError::TagLost),
        _ => Err(TransportError::TagStatus(status)),
    }
}

impl TagReader for NusbReader {
    fn is_available(&self) -> bool {
        true
    }

    async fn begin_polling(&self, alert: &str) -> Result<(), TransportError> {
        info!(alert = %alert, "Polling for tags");
        self.call(CMD_RF_CONFIGURATION, vec![CFG_RF_FIELD, 0x01])
            .await?;
        // Bounded passive activation so each poll returns promptly
        self.call(CMD_RF_CONFIGURATION, vec![CFG_MAX_RETRIES, 0xFF, 0x01, 0x02])
            .await?;
        Ok(())
    }

    async fn detect(&self) -> Result<Vec<DetectedTag>, TransportError> {
        loop {
            // Two slots so a second tag in the field shows up as a collision
            let mut targets = self.list_targets(2, BRTY_106_TYPE_A).await?;
            if targets.is_empty() {
                targets = self.list_targets(1, BRTY_212_FELICA).await?;
            }
            if !targets.is_empty() {
                debug!(count = targets.len(), "Targets in field");
                return Ok(targets
                    .into_iter()
                    .map(|t| DetectedTag::new(t.technology, TagHandle(t.tg)))
                    .collect());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn restart_polling(&self) -> Result<(), TransportError> {
        let data = self.call(CMD_IN_RELEASE, vec![0x00]).await?;
        check_status(data.first().copied().unwrap_or(0))
    }

    async fn connect(&self, tag: &DetectedTag) -> Result<(), TransportError> {
        let data = self.call(CMD_IN_SELECT, vec![tag.handle.0]).await?;
        check_status(data.first().copied().unwrap_or(0))
    }

    async fn transceive(
        &self,
        tag: &DetectedTag,
        command: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let mut params = Vec::with_capacity(command.len() + 1);
        params.push(tag.handle.0);
        params.extend_from_slice(command);

        let data = self.call(CMD_IN_DATA_EXCHANGE, params).await?;
        let (&status, payload) = data
            .split_first()
            .ok_or_else(|| TransportError::ReadFailed("Empty exchange response".into()))?;
        check_status(status)?;
        Ok(payload.to_vec())
    }

    async fn invalidate(&self, status: &str) {
        info!(status = %status, "Ending reader session");
        if let Err(e) = self.call(CMD_IN_RELEASE, vec![0x00]).await {
            warn!(error = %e, "Failed to release targets");
        }
        if let Err(e) = self.call(CMD_RF_CONFIGURATION, vec![CFG_RF_FIELD, 0x00]).await {
            warn!(error = %e, "Failed to switch RF field off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status(0x00).is_ok());
        // Bits 6..7 are flags, not errors
        assert!(check_status(0x40).is_ok());
        assert!(matches!(check_status(0x01), Err(TransportError::TagLost)));
        assert!(matches!(
            check_status(0x14),
            Err(TransportError::TagStatus(0x14))
        ));
    }
}
