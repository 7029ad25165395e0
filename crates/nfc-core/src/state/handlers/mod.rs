//! Tag handlers - dispatch logic for each technology family.
//!
//! This module is split into submodules by functionality:
//! - `identity`: identity reports for every family
//! - `memory_page`: page read/write/erase procedures
//! - `ndef`: the legacy message-based path

mod identity;
mod memory_page;
pub(crate) mod ndef;

use tokio::sync::watch;

use crate::events::{IdentityField, SessionObserver, TagEvent};
use crate::protocol::hex_lower;
use crate::session::{SessionConfig, SessionError};
use crate::state::machine::SessionMode;
use crate::tag::{DetectedTag, TagTechnology};
use crate::transport::{TagReader, TransportError};

pub(crate) const SCAN_COMPLETED: &str = "NFC tag scanned successfully";

/// Terminal success of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// Human-readable status, reported as the session's final event.
    pub message: String,
    /// Text found on the tag, if any was read.
    pub decoded_text: Option<String>,
}

impl OperationOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            decoded_text: None,
        }
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.decoded_text = text;
        self
    }
}

pub type OperationResult = Result<OperationOutcome, SessionError>;

/// Handler context containing all resources for one connected tag.
pub struct HandlerContext<'a, R, O: SessionObserver> {
    pub reader: &'a R,
    pub observer: &'a O,
    pub mode: SessionMode,
    pub pending_text: &'a str,
    pub config: &'a SessionConfig,
    /// Flips to true when the session is invalidated from outside.
    pub cancel: &'a watch::Receiver<bool>,
}

impl<R, O: SessionObserver> HandlerContext<'_, R, O> {
    pub(crate) fn emit(&self, event: TagEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn emit_identity(&self, field: IdentityField, value: &[u8]) {
        self.emit(TagEvent::Identity {
            field,
            value: hex_lower(value),
        });
    }

    /// Fails with `Cancelled` once the session has been invalidated.
    pub(crate) fn ensure_active(&self) -> Result<(), SessionError> {
        if *self.cancel.borrow() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }
}

impl<R: TagReader, O: SessionObserver> HandlerContext<'_, R, O> {
    /// One command round-trip with the connected tag.
    pub(crate) async fn send(
        &self,
        tag: &DetectedTag,
        command: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.reader.transceive(tag, command).await
    }
}

/// Classify a connected tag and run the requested operation on it.
pub async fn handle_tag<R: TagReader, O: SessionObserver>(
    tag: &DetectedTag,
    ctx: &HandlerContext<'_, R, O>,
) -> OperationResult {
    match &tag.technology {
        TagTechnology::MemoryPage { .. } => {
            identity::report(ctx, &tag.technology);
            match ctx.mode {
                SessionMode::Clear => {
                    memory_page::erase_range(
                        ctx,
                        tag,
                        ctx.config.first_user_page,
                        ctx.config.last_user_page,
                    )
                    .await
                }
                SessionMode::Write => {
                    memory_page::read_then_maybe_write(
                        ctx,
                        tag,
                        ctx.config.target_page,
                        ctx.pending_text,
                    )
                    .await
                }
                SessionMode::Read => Ok(OperationOutcome::new(SCAN_COMPLETED)),
            }
        }
        TagTechnology::Unknown { description } => {
            Err(SessionError::UnknownTagType(description.clone()))
        }
        technology => {
            identity::report(ctx, technology);
            match ctx.mode {
                SessionMode::Read => Ok(OperationOutcome::new(SCAN_COMPLETED)),
                mode => Err(SessionError::OperationUnsupported {
                    technology: tag.kind().to_string(),
                    mode,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingObserver;
    use crate::transport::MockReader;

    fn context<'a>(
        reader: &'a MockReader,
        observer: &'a CollectingObserver,
        mode: SessionMode,
        config: &'a SessionConfig,
        cancel: &'a watch::Receiver<bool>,
    ) -> HandlerContext<'a, MockReader, CollectingObserver> {
        HandlerContext {
            reader,
            observer,
            mode,
            pending_text: "",
            config,
            cancel,
        }
    }

    #[tokio::test]
    async fn test_erase_stops_once_invalidated() {
        let reader = MockReader::new();
        let observer = CollectingObserver::new();
        let config = SessionConfig::default();
        let (tx, rx) = watch::channel(true);
        let ctx = context(&reader, &observer, SessionMode::Clear, &config, &rx);
        let tag = reader.add_memory_tag(1, &[0x04, 0x11]);

        let result = handle_tag(&tag, &ctx).await;

        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert!(reader.commands().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_smart_card_without_historical_bytes() {
        let reader = MockReader::new();
        let observer = CollectingObserver::new();
        let config = SessionConfig::default();
        let (_tx, rx) = watch::channel(false);
        let ctx = context(&reader, &observer, SessionMode::Read, &config, &rx);
        let tag = DetectedTag::new(
            TagTechnology::SmartCard {
                identifier: vec![0x08, 0x01],
                application_data: Some(vec![0xA0, 0x00]),
                historical_bytes: None,
            },
            crate::tag::TagHandle(1),
        );

        let outcome = handle_tag(&tag, &ctx).await.unwrap();

        assert_eq!(outcome.message, SCAN_COMPLETED);
        assert_eq!(
            observer.lines(),
            vec![
                "ISO7816 UID: 0801",
                "Application Data: a000",
                "Historical Bytes: none",
            ]
        );
    }
}
