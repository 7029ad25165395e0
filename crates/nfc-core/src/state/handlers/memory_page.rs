//! Page read/write/erase procedures for memory-page tags.

use tracing::{debug, info, warn};

use super::{HandlerContext, OperationOutcome, OperationResult};
use crate::events::{SessionObserver, TagEvent};
use crate::protocol::{
    PAGE_SIZE, ZERO_PAGE, decode_text, encode_page_text, encode_read_command,
    encode_write_command,
};
use crate::session::SessionError;
use crate::tag::DetectedTag;
use crate::transport::{TagReader, TransportError};

pub(crate) const WRITE_COMPLETED: &str = "Write completed";
pub(crate) const DUPLICATE_TEXT: &str =
    "Previous message is the same as the new message. Cannot write the same message twice";
pub(crate) const TAG_CLEARED: &str = "Tag cleared successfully";

/// Low nibble of a single-page write acknowledgement.
const ACK_NIBBLE: u8 = 0x0A;

/// Read `page` once and write `candidate` unless that page already holds it.
///
/// Only the target page decides whether the write is skipped. The rest of
/// the read response is decoded for reporting.
pub(super) async fn read_then_maybe_write<R: TagReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &DetectedTag,
    page: u8,
    candidate: &str,
) -> OperationResult {
    let wanted = encode_page_text(candidate)?;
    let response = ctx
        .send(tag, &encode_read_command(page))
        .await
        .map_err(SessionError::transport("read"))?;
    let unchanged = response.get(..PAGE_SIZE) == Some(&wanted[..]);

    let current = match decode_text(&response) {
        Ok(text) if text.is_empty() => {
            debug!(page, "Target page is blank");
            None
        }
        Ok(text) => {
            ctx.emit(TagEvent::TextRead {
                page,
                text: text.clone(),
            });
            Some(text)
        }
        Err(e) => {
            debug!(page, error = %e, "Stored data is not text, overwriting");
            ctx.emit(TagEvent::Undecodable { page });
            None
        }
    };

    if unchanged {
        info!(page, "Tag already holds this text");
        return Ok(OperationOutcome::new(DUPLICATE_TEXT).with_text(current));
    }

    ctx.ensure_active()?;
    let outcome = write(ctx, tag, page, candidate).await?;
    Ok(outcome.with_text(current))
}

/// Write `text` into one page.
pub(super) async fn write<R: TagReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &DetectedTag,
    page: u8,
    text: &str,
) -> OperationResult {
    let command = encode_write_command(page, &encode_page_text(text)?)?;
    write_page(ctx, tag, &command)
        .await
        .map_err(SessionError::transport("write"))?;

    info!(page, "Page written");
    Ok(OperationOutcome::new(WRITE_COMPLETED))
}

/// Zero pages `first..=last` in ascending order, stopping at the first failure.
pub(super) async fn erase_range<R: TagReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &DetectedTag,
    first: u8,
    last: u8,
) -> OperationResult {
    info!(first, last, "Clearing user pages");

    for page in first..=last {
        ctx.ensure_active()?;
        let command = encode_write_command(page, &ZERO_PAGE)?;
        if let Err(source) = write_page(ctx, tag, &command).await {
            warn!(page, error = %source, "Failed to clear page");
            return Err(SessionError::ClearFailed { page, source });
        }
        ctx.emit(TagEvent::PageCleared { page });
    }

    Ok(OperationOutcome::new(TAG_CLEARED))
}

async fn write_page<R: TagReader, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    tag: &DetectedTag,
    command: &[u8],
) -> Result<(), TransportError> {
    let response = ctx.send(tag, command).await?;

    // Readers that strip the ACK return no data
    match response.first() {
        Some(&ack) if ack & 0x0F != ACK_NIBBLE => Err(TransportError::TagStatus(ack)),
        _ => Ok(()),
    }
}
