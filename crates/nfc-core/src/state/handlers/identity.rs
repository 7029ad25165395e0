//! Identity reports for tags that only expose identifiers.

use super::HandlerContext;
use crate::events::{IdentityField, SessionObserver, TagEvent};
use crate::protocol::hex_lower;
use crate::tag::TagTechnology;

/// Emit the identity fields of one technology, in a fixed order.
pub(super) fn report<R, O: SessionObserver>(
    ctx: &HandlerContext<'_, R, O>,
    technology: &TagTechnology,
) {
    match technology {
        TagTechnology::MemoryPage { identifier } => {
            ctx.emit_identity(IdentityField::MemoryPageUid, identifier);
        }
        TagTechnology::SmartCard {
            identifier,
            application_data,
            historical_bytes,
        } => {
            ctx.emit_identity(IdentityField::SmartCardUid, identifier);
            if let Some(data) = application_data {
                ctx.emit_identity(IdentityField::ApplicationData, data);
            }
            ctx.emit(TagEvent::Identity {
                field: IdentityField::HistoricalBytes,
                value: historical_bytes
                    .as_deref()
                    .map(hex_lower)
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
        TagTechnology::Vicinity { identifier } => {
            ctx.emit_identity(IdentityField::VicinityUid, identifier);
        }
        TagTechnology::ContactlessIc {
            current_idm,
            system_code,
        } => {
            ctx.emit_identity(IdentityField::ContactlessIdm, current_idm);
            ctx.emit_identity(IdentityField::SystemCode, system_code);
        }
        TagTechnology::Unknown { description } => {
            tracing::debug!(description = %description, "No identity to report");
        }
    }
}
