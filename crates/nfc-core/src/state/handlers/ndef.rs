//! Legacy message-based path.
//!
//! Backends either hand over messages they already read, or expose
//! NDEF-capable tags that need an explicit status query before reading
//! or writing.

use tracing::{debug, info};

use super::{HandlerContext, OperationOutcome, OperationResult};
use crate::events::{SessionObserver, TagEvent};
use crate::protocol::NdefMessage;
use crate::session::SessionError;
use crate::state::machine::SessionMode;
use crate::tag::{NdefStatus, NdefTag};
use crate::transport::NdefReader;

pub(crate) const NDEF_FOUND: &str = "Found 1 NDEF message";
pub(crate) const NDEF_WRITTEN: &str = "Write NDEF message successful";
pub(crate) const NDEF_CLEARED: &str = "NDEF message cleared";

/// Report the first UTF-8 payload of every message in one batch.
pub(crate) fn report_messages<R, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    messages: &[NdefMessage],
) {
    for message in messages {
        match message.first_utf8_payload() {
            Some(text) => ctx.emit(TagEvent::NdefData { text }),
            None => debug!(records = message.records.len(), "No UTF-8 payload in message"),
        }
    }
}

/// Query, then read, write or clear one connected NDEF tag.
pub(crate) async fn handle_ndef_tag<R: NdefReader, O: SessionObserver>(
    tag: &NdefTag,
    ctx: &HandlerContext<'_, R, O>,
) -> OperationResult {
    let (status, capacity) = ctx
        .reader
        .query_ndef_status(tag)
        .await
        .map_err(SessionError::StatusQueryFailure)?;
    debug!(?status, capacity, "NDEF status");

    match (status, ctx.mode) {
        (NdefStatus::NotSupported, _) => Err(SessionError::NotNdefCompliant),
        (_, SessionMode::Read) => read(ctx, tag).await,
        (NdefStatus::ReadOnly, _) => Err(SessionError::ReadOnlyTag),
        (NdefStatus::ReadWrite, SessionMode::Write) => {
            let message = NdefMessage::text(ctx.pending_text)?;
            write(ctx, tag, &message, capacity).await?;
            Ok(OperationOutcome::new(NDEF_WRITTEN))
        }
        (NdefStatus::ReadWrite, SessionMode::Clear) => {
            write(ctx, tag, &NdefMessage::empty(), capacity).await?;
            Ok(OperationOutcome::new(NDEF_CLEARED))
        }
    }
}

async fn read<R: NdefReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &NdefTag,
) -> OperationResult {
    let message = ctx
        .reader
        .read_ndef(tag)
        .await
        .map_err(SessionError::transport("read NDEF"))?;

    let text = message
        .records
        .iter()
        .find_map(|r| r.text_content())
        .or_else(|| message.first_utf8_payload());
    if let Some(text) = &text {
        ctx.emit(TagEvent::NdefData { text: text.clone() });
    }
    Ok(OperationOutcome::new(NDEF_FOUND).with_text(text))
}

async fn write<R: NdefReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &NdefTag,
    message: &NdefMessage,
    capacity: usize,
) -> Result<(), SessionError> {
    let needed = message.encoded_len();
    if needed > capacity {
        return Err(SessionError::CapacityExceeded { needed, capacity });
    }
    ctx.ensure_active()?;

    ctx.reader
        .write_ndef(tag, message)
        .await
        .map_err(SessionError::transport("write NDEF"))?;
    info!(bytes = needed, "NDEF message written");
    Ok(())
}
