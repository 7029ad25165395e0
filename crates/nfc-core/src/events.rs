//! Event system for UI decoupling.
//!
//! Every step of a session is reported as a `TagEvent`. Each event renders
//! as one human-readable line, and collaborators that need more can match
//! on the variants.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity fields reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    MemoryPageUid,
    SmartCardUid,
    ApplicationData,
    HistoricalBytes,
    VicinityUid,
    ContactlessIdm,
    SystemCode,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::MemoryPageUid => write!(f, "MiFare UID"),
            IdentityField::SmartCardUid => write!(f, "ISO7816 UID"),
            IdentityField::ApplicationData => write!(f, "Application Data"),
            IdentityField::HistoricalBytes => write!(f, "Historical Bytes"),
            IdentityField::VicinityUid => write!(f, "ISO15693 UID"),
            IdentityField::ContactlessIdm => write!(f, "FeliCa IDm"),
            IdentityField::SystemCode => write!(f, "System Code"),
        }
    }
}

/// Events emitted by a tag session, in protocol order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    /// Polling started.
    SessionStarted { alert: String },
    /// More than one tag in the field; polling restarts after a delay.
    TooManyTags { count: usize },
    /// One identity field of the connected tag, hex encoded.
    Identity { field: IdentityField, value: String },
    /// Text found on the tag before deciding whether to write.
    TextRead { page: u8, text: String },
    /// The read response held bytes that are not text.
    Undecodable { page: u8 },
    /// One page of an erase was zeroed.
    PageCleared { page: u8 },
    /// Text payload delivered by a legacy message-based reader.
    NdefData { text: String },
    /// Terminal success status.
    Completed { message: String },
    /// Terminal failure. Exactly one per failed session.
    Failed { error: String },
}

impl TagEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TagEvent::Completed { .. } | TagEvent::Failed { .. })
    }
}

impl fmt::Display for TagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagEvent::SessionStarted { alert } => write!(f, "{}", alert),
            TagEvent::TooManyTags { count } => write!(
                f,
                "{} tags detected. Remove all but one tag and try again.",
                count
            ),
            TagEvent::Identity { field, value } => write!(f, "{}: {}", field, value),
            TagEvent::TextRead { page, text } => write!(f, "Page {} holds: {}", page, text),
            TagEvent::Undecodable { page } => write!(f, "Could not decode text at page {}", page),
            TagEvent::PageCleared { page } => write!(f, "Cleared page {}", page),
            TagEvent::NdefData { text } => write!(f, "NFC Data: {}", text),
            TagEvent::Completed { message } => write!(f, "{}", message),
            TagEvent::Failed { error } => write!(f, "Session invalidated: {}", error),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SessionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &TagEvent);
}

impl<O: SessionObserver + ?Sized> SessionObserver for Arc<O> {
    fn on_event(&self, event: &TagEvent) {
        (**self).on_event(event);
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &TagEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &TagEvent) {
        match event {
            TagEvent::SessionStarted { alert } => {
                tracing::info!(alert = %alert, "Session started");
            }
            TagEvent::TooManyTags { count } => {
                tracing::warn!(count = count, "Too many tags");
            }
            TagEvent::Identity { field, value } => {
                tracing::info!(field = %field, value = %value, "Tag identity");
            }
            TagEvent::TextRead { page, text } => {
                tracing::info!(page = page, text = %text, "Text read");
            }
            TagEvent::Undecodable { page } => {
                tracing::warn!(page = page, "Could not decode text");
            }
            TagEvent::PageCleared { page } => {
                tracing::debug!(page = page, "Page cleared");
            }
            TagEvent::NdefData { text } => {
                tracing::info!(text = %text, "NDEF data");
            }
            TagEvent::Completed { message } => {
                tracing::info!("{}", message);
            }
            TagEvent::Failed { error } => {
                tracing::error!("Session invalidated: {}", error);
            }
        }
    }
}

/// Observer that keeps every event, for tests and batch callers.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<TagEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TagEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Rendered lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }
}

impl SessionObserver for CollectingObserver {
    fn on_event(&self, event: &TagEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events to an observer running on its own tokio task.
///
/// Events reach the inner observer one at a time and in emission order,
/// never on the session task. The task ends once every `DispatchObserver`
/// clone is dropped.
#[derive(Clone)]
pub struct DispatchObserver {
    tx: mpsc::UnboundedSender<TagEvent>,
}

impl DispatchObserver {
    /// Must be called from within a tokio runtime.
    pub fn spawn<O>(observer: O) -> (Self, JoinHandle<()>)
    where
        O: SessionObserver + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<TagEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                observer.on_event(&event);
            }
        });
        (Self { tx }, handle)
    }
}

impl SessionObserver for DispatchObserver {
    fn on_event(&self, event: &TagEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!("Event dispatcher closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_lines() {
        let event = TagEvent::Identity {
            field: IdentityField::MemoryPageUid,
            value: "04a1b2".into(),
        };
        assert_eq!(event.to_string(), "MiFare UID: 04a1b2");
        assert_eq!(
            TagEvent::PageCleared { page: 7 }.to_string(),
            "Cleared page 7"
        );
        assert_eq!(
            TagEvent::Undecodable { page: 4 }.to_string(),
            "Could not decode text at page 4"
        );
        assert_eq!(
            TagEvent::NdefData { text: "hi".into() }.to_string(),
            "NFC Data: hi"
        );
        assert!(!event.is_terminal());
        assert!(
            TagEvent::Failed {
                error: "x".into()
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let collected = Arc::new(CollectingObserver::new());
        let (dispatch, handle) = DispatchObserver::spawn(Arc::clone(&collected));

        for page in 4..=8 {
            dispatch.on_event(&TagEvent::PageCleared { page });
        }
        drop(dispatch);
        handle.await.unwrap();

        let pages: Vec<u8> = collected
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TagEvent::PageCleared { page } => Some(page),
                _ => None,
            })
            .collect();
        assert_eq!(pages, vec![4, 5, 6, 7, 8]);
    }
}
