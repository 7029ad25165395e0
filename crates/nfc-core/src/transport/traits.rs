//! Reader backend abstraction.
//!
//! Defines the `TagReader` trait for tag sessions and the `NdefReader`
//! trait for the legacy message-based path, allowing different
//! implementations (nusb PN533, mock, etc.).

use std::future::Future;

use thiserror::Error;

use super::frame::FrameError;
use crate::protocol::NdefMessage;
use crate::tag::{DetectedTag, NdefDetection, NdefStatus, NdefTag};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tag returned error status 0x{0:02X}")]
    TagStatus(u8),

    #[error("Tag left the field")]
    TagLost,

    #[error("Not supported by this reader: {0}")]
    Unsupported(String),

    #[error("Malformed reader frame: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract tag-session reader.
///
/// Async methods return `Send` futures so a session can run on any
/// tokio worker.
pub trait TagReader: Send + Sync {
    /// Whether scanning hardware is present and usable.
    fn is_available(&self) -> bool;

    /// Start RF polling. `alert` is shown by readers that have a display.
    fn begin_polling(&self, alert: &str)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait until at least one tag is in the field and report every tag sensed.
    fn detect(&self) -> impl Future<Output = Result<Vec<DetectedTag>, TransportError>> + Send;

    /// Re-arm polling after a detection that could not be used.
    fn restart_polling(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn connect(&self, tag: &DetectedTag)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// One request/response exchange with a connected tag.
    fn transceive(
        &self,
        tag: &DetectedTag,
        command: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Stop polling and release any connected tag.
    fn invalidate(&self, status: &str) -> impl Future<Output = ()> + Send;
}

/// Abstract message-based (legacy) reader.
pub trait NdefReader: Send + Sync {
    fn begin_ndef_session(
        &self,
        alert: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn detect_ndef(&self) -> impl Future<Output = Result<NdefDetection, TransportError>> + Send;

    fn restart_ndef_polling(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn connect_ndef(&self, tag: &NdefTag)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// NDEF status and capacity in bytes.
    fn query_ndef_status(
        &self,
        tag: &NdefTag,
    ) -> impl Future<Output = Result<(NdefStatus, usize), TransportError>> + Send;

    fn read_ndef(
        &self,
        tag: &NdefTag,
    ) -> impl Future<Output = Result<NdefMessage, TransportError>> + Send;

    fn write_ndef(
        &self,
        tag: &NdefTag,
        message: &NdefMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn end_ndef_session(&self, status: &str) -> impl Future<Output = ()> + Send;
}
