//! Session controller - owns the polling lifecycle of one reader.
//!
//! A controller runs at most one session at a time: poll, wait out
//! collisions, connect to the single tag in the field, run the requested
//! operation and invalidate with one final status event.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::events::{SessionObserver, TagEvent, TracingObserver};
use crate::protocol::constants::{
    COLLISION_RETRY_DELAY_MS, DEFAULT_ALERT_MESSAGE, DEFAULT_TARGET_PAGE, FIRST_USER_PAGE,
    LAST_USER_PAGE_NTAG213, SESSION_TIMEOUT_SECS,
};
use crate::protocol::{CodecError, NdefError, encode_page_text};
use crate::state::handlers::{HandlerContext, OperationResult, handle_tag, ndef};
use crate::state::machine::{Session, SessionMode, SessionState};
use crate::tag::{NdefDetection, TagCapacity};
use crate::transport::{NdefReader, TagReader, TransportError};

/// Configuration for a tag session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prompt shown while polling.
    pub alert_message: String,
    /// Page read and written by the write operation.
    pub target_page: u8,
    /// First page zeroed by a clear.
    pub first_user_page: u8,
    /// Last page zeroed by a clear, inclusive.
    pub last_user_page: u8,
    /// Delay before polling again after a collision.
    pub collision_retry_delay_ms: u64,
    /// Give up after this many collisions. Unbounded when unset.
    pub max_collision_retries: Option<u32>,
    /// Sessions still running after this long are invalidated.
    pub session_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            alert_message: DEFAULT_ALERT_MESSAGE.to_string(),
            target_page: DEFAULT_TARGET_PAGE,
            first_user_page: FIRST_USER_PAGE,
            last_user_page: LAST_USER_PAGE_NTAG213,
            collision_retry_delay_ms: COLLISION_RETRY_DELAY_MS,
            max_collision_retries: None,
            session_timeout_secs: SESSION_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Use the user page range of a known tag type for clearing.
    pub fn with_capacity(mut self, capacity: TagCapacity) -> Self {
        let pages = capacity.user_pages();
        self.first_user_page = *pages.start();
        self.last_user_page = *pages.end();
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.first_user_page < FIRST_USER_PAGE {
            return Err(SessionError::InvalidConfig(format!(
                "first_user_page {} overlaps the tag header (pages 0..{})",
                self.first_user_page, FIRST_USER_PAGE
            )));
        }
        if self.first_user_page > self.last_user_page {
            return Err(SessionError::InvalidConfig(format!(
                "first_user_page {} is after last_user_page {}",
                self.first_user_page, self.last_user_page
            )));
        }
        if !(self.first_user_page..=self.last_user_page).contains(&self.target_page) {
            return Err(SessionError::InvalidConfig(format!(
                "target_page {} is outside the user pages",
                self.target_page
            )));
        }
        if self.session_timeout_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "session_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn collision_retry_delay(&self) -> Duration {
        Duration::from_millis(self.collision_retry_delay_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// What a caller asks of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Text to write. Empty for a plain read.
    pub write_text: String,
    /// Zero the user pages. Takes precedence over `write_text`.
    pub clear: bool,
}

impl SessionRequest {
    pub fn read() -> Self {
        Self::default()
    }

    pub fn write(text: impl Into<String>) -> Self {
        Self {
            write_text: text.into(),
            clear: false,
        }
    }

    pub fn clear() -> Self {
        Self {
            write_text: String::new(),
            clear: true,
        }
    }

    pub fn mode(&self) -> SessionMode {
        SessionMode::select(&self.write_text, self.clear)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailure(#[source] TransportError),

    #[error("Unable to query NDEF status of tag: {0}")]
    StatusQueryFailure(#[source] TransportError),

    #[error("Tag is not NDEF compliant")]
    NotNdefCompliant,

    #[error("Cannot {mode} {technology} tags")]
    OperationUnsupported {
        technology: String,
        mode: SessionMode,
    },

    #[error("Tag is read only")]
    ReadOnlyTag,

    #[error("Unknown tag type: {0}")]
    UnknownTagType(String),

    #[error("Transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Failed to clear page {page}: {source}")]
    ClearFailed {
        page: u8,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("NDEF error: {0}")]
    Ndef(#[from] NdefError),

    #[error("A session is already active")]
    SessionAlreadyActive,

    #[error("No tags found")]
    NoTagsFound,

    #[error("{count} tags detected")]
    TooManyTagsDetected { count: usize },

    #[error("Gave up after {retries} collision retries")]
    CollisionRetriesExhausted { retries: u32 },

    #[error("Message needs {needed} bytes but the tag holds {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Session timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Session cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Recoverable errors restart polling instead of ending the session.
    /// Only a collision is; an empty detection ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::TooManyTagsDetected { .. })
    }

    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |source| SessionError::Transport { operation, source }
    }
}

/// Exactly one tag may be operated on.
fn check_detection(count: usize) -> Result<(), SessionError> {
    match count {
        0 => Err(SessionError::NoTagsFound),
        1 => Ok(()),
        count => Err(SessionError::TooManyTagsDetected { count }),
    }
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the session to `Idle` however the session future ends.
struct ResetOnDrop<'a>(&'a Mutex<Session>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        lock_session(self.0).reset();
    }
}

async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        let cancelled = *cancel.borrow_and_update();
        if cancelled {
            return;
        }
        if cancel.changed().await.is_err() {
            // Controller dropped; nothing can cancel any more
            std::future::pending::<()>().await;
        }
    }
}

/// Tag session controller.
pub struct SessionController<R, O: SessionObserver = TracingObserver> {
    reader: R,
    observer: Arc<O>,
    config: SessionConfig,
    session: Mutex<Session>,
    cancel: watch::Sender<bool>,
}

impl<R> SessionController<R, TracingObserver> {
    /// Create a controller with the default tracing observer.
    pub fn new(reader: R, config: SessionConfig) -> Self {
        Self::with_observer(reader, config, Arc::new(TracingObserver))
    }
}

impl<R, O: SessionObserver> SessionController<R, O> {
    /// Create a controller with a custom observer.
    pub fn with_observer(reader: R, config: SessionConfig, observer: Arc<O>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            reader,
            observer,
            config,
            session: Mutex::new(Session::new()),
            cancel,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn state(&self) -> SessionState {
        lock_session(&self.session).state
    }

    /// End the active session from outside.
    ///
    /// Returns false if no session is running, or if the running one has
    /// already reported its final status.
    pub fn invalidate(&self) -> bool {
        let session = lock_session(&self.session);
        if !session.is_cancellable() {
            return false;
        }
        info!(state = %session.state, "Invalidating session");
        self.cancel.send_replace(true);
        true
    }

    fn emit(&self, event: TagEvent) {
        self.observer.on_event(&event);
    }

    fn goto_state(&self, state: SessionState) {
        lock_session(&self.session).goto_state(state);
    }

    /// Validate the request and take the single session slot.
    fn claim(
        &self,
        request: &SessionRequest,
    ) -> Result<(SessionMode, watch::Receiver<bool>), SessionError> {
        let mode = request.mode();
        if mode == SessionMode::Write {
            encode_page_text(&request.write_text)?;
        }

        let mut session = lock_session(&self.session);
        if !session.begin(mode, &request.write_text) {
            return Err(SessionError::SessionAlreadyActive);
        }
        self.cancel.send_replace(false);
        Ok((mode, self.cancel.subscribe()))
    }

    fn context<'a>(
        &'a self,
        mode: SessionMode,
        pending_text: &'a str,
        cancel: &'a watch::Receiver<bool>,
    ) -> HandlerContext<'a, R, O> {
        HandlerContext {
            reader: &self.reader,
            observer: self.observer.as_ref(),
            mode,
            pending_text,
            config: &self.config,
            cancel,
        }
    }

    /// Race the session body against cancellation and the session timeout.
    async fn supervise<F>(&self, cancel: watch::Receiver<bool>, run: F) -> OperationResult
    where
        F: Future<Output = OperationResult>,
    {
        let timeout = self.config.session_timeout();
        tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => Err(SessionError::Cancelled),
            result = tokio::time::timeout(timeout, run) => result.unwrap_or_else(|_| {
                Err(SessionError::Timeout {
                    secs: self.config.session_timeout_secs,
                })
            }),
        }
    }

    /// Emit the single final event and return the status for the reader.
    fn conclude(&self, result: &OperationResult) -> String {
        self.goto_state(SessionState::Invalidated);
        match result {
            Ok(outcome) => {
                self.emit(TagEvent::Completed {
                    message: outcome.message.clone(),
                });
                outcome.message.clone()
            }
            Err(error) => {
                warn!(error = %error, "Session failed");
                let status = error.to_string();
                self.emit(TagEvent::Failed {
                    error: status.clone(),
                });
                status
            }
        }
    }

    async fn retry_after_collision(&self, count: usize) -> Result<(), SessionError> {
        let retries = {
            let mut session = lock_session(&self.session);
            session.goto_state(SessionState::CollisionRetry);
            session.collision_retries += 1;
            session.collision_retries
        };
        if let Some(max) = self.config.max_collision_retries {
            if retries > max {
                return Err(SessionError::CollisionRetriesExhausted { retries: max });
            }
        }

        debug!(count, retries, "Tag collision, retrying");
        self.emit(TagEvent::TooManyTags { count });
        tokio::time::sleep(self.config.collision_retry_delay()).await;
        Ok(())
    }
}

impl<R: TagReader, O: SessionObserver> SessionController<R, O> {
    pub fn is_scanning_supported(&self) -> bool {
        self.reader.is_available()
    }

    /// Run one session to completion.
    ///
    /// Returns the terminal outcome, which has also been reported to the
    /// observer. Only `SessionAlreadyActive` and invalid write text are
    /// returned without an event, since no session was started.
    #[instrument(skip(self), fields(mode = %request.mode()))]
    pub async fn start_session(&self, request: SessionRequest) -> OperationResult {
        let (mode, cancel) = self.claim(&request)?;
        let _reset = ResetOnDrop(&self.session);

        let result = self
            .supervise(
                cancel.clone(),
                self.run(mode, &request.write_text, &cancel),
            )
            .await;

        let status = self.conclude(&result);
        self.reader.invalidate(&status).await;
        result
    }

    async fn run(
        &self,
        mode: SessionMode,
        pending_text: &str,
        cancel: &watch::Receiver<bool>,
    ) -> OperationResult {
        let alert = &self.config.alert_message;
        self.reader
            .begin_polling(alert)
            .await
            .map_err(SessionError::transport("begin polling"))?;
        self.emit(TagEvent::SessionStarted {
            alert: alert.clone(),
        });

        let tag = loop {
            let mut tags = self
                .reader
                .detect()
                .await
                .map_err(SessionError::transport("detect"))?;
            match check_detection(tags.len()) {
                Ok(()) => break tags.swap_remove(0),
                Err(SessionError::TooManyTagsDetected { count }) => {
                    self.retry_after_collision(count).await?
                }
                Err(error) => return Err(error),
            }

            self.reader
                .restart_polling()
                .await
                .map_err(SessionError::transport("restart polling"))?;
            self.goto_state(SessionState::PollingActive);
        };

        self.goto_state(SessionState::Connecting);
        info!(kind = %tag.kind(), uid = %tag.uid_hex(), "Connecting to tag");
        self.reader
            .connect(&tag)
            .await
            .map_err(SessionError::ConnectionFailure)?;

        self.goto_state(SessionState::Operating);
        let ctx = self.context(mode, pending_text, cancel);
        handle_tag(&tag, &ctx).await
    }
}

impl<R: NdefReader, O: SessionObserver> SessionController<R, O> {
    /// Run one session on the message-based path.
    #[instrument(skip(self), fields(mode = %request.mode()))]
    pub async fn start_legacy_session(&self, request: SessionRequest) -> OperationResult {
        let (mode, cancel) = self.claim(&request)?;
        let _reset = ResetOnDrop(&self.session);

        let result = self
            .supervise(
                cancel.clone(),
                self.run_legacy(mode, &request.write_text, &cancel),
            )
            .await;

        let status = self.conclude(&result);
        self.reader.end_ndef_session(&status).await;
        result
    }

    async fn run_legacy(
        &self,
        mode: SessionMode,
        pending_text: &str,
        cancel: &watch::Receiver<bool>,
    ) -> OperationResult {
        let alert = &self.config.alert_message;
        self.reader
            .begin_ndef_session(alert)
            .await
            .map_err(SessionError::transport("begin NDEF session"))?;
        self.emit(TagEvent::SessionStarted {
            alert: alert.clone(),
        });

        loop {
            let detection = self
                .reader
                .detect_ndef()
                .await
                .map_err(SessionError::transport("detect NDEF"))?;

            let mut tags = match detection {
                NdefDetection::Messages(messages) => {
                    if mode != SessionMode::Read {
                        return Err(SessionError::OperationUnsupported {
                            technology: "message-only NDEF".into(),
                            mode,
                        });
                    }
                    // Message batches keep the session open until it is
                    // invalidated or times out
                    let ctx = self.context(mode, pending_text, cancel);
                    ndef::report_messages(&ctx, &messages);
                    continue;
                }
                NdefDetection::Tags(tags) => tags,
            };

            match check_detection(tags.len()) {
                Ok(()) => {
                    let tag = tags.swap_remove(0);
                    self.goto_state(SessionState::Connecting);
                    self.reader
                        .connect_ndef(&tag)
                        .await
                        .map_err(SessionError::ConnectionFailure)?;

                    self.goto_state(SessionState::Operating);
                    let ctx = self.context(mode, pending_text, cancel);
                    return ndef::handle_ndef_tag(&tag, &ctx).await;
                }
                Err(SessionError::TooManyTagsDetected { count }) => {
                    self.retry_after_collision(count).await?
                }
                Err(error) => return Err(error),
            }

            self.reader
                .restart_ndef_polling()
                .await
                .map_err(SessionError::transport("restart NDEF polling"))?;
            self.goto_state(SessionState::PollingActive);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockReader;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alert_message, "Hold your device near the tag");
        assert_eq!(config.collision_retry_delay(), Duration::from_millis(500));
        assert_eq!(config.first_user_page..=config.last_user_page, 4..=39);
        assert_eq!(config.max_collision_retries, None);
    }

    #[test]
    fn test_config_validation() {
        let inverted = SessionConfig {
            first_user_page: 10,
            last_user_page: 9,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(SessionError::InvalidConfig(_))
        ));

        let header = SessionConfig {
            first_user_page: 2,
            ..Default::default()
        };
        assert!(header.validate().is_err());

        let no_timeout = SessionConfig {
            session_timeout_secs: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());

        let ntag216 = SessionConfig::default().with_capacity(TagCapacity::Ntag216);
        assert_eq!(ntag216.last_user_page, 225);
        assert!(ntag216.validate().is_ok());
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!("nfc-core-config-{}.toml", std::process::id()));
        let config = SessionConfig {
            alert_message: "Tap a tag".into(),
            max_collision_retries: Some(3),
            ..Default::default()
        }
        .with_capacity(TagCapacity::Ntag215);

        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = toml::from_str("collision_retry_delay_ms = 250\n").unwrap();
        assert_eq!(config.collision_retry_delay_ms, 250);
        assert_eq!(config.target_page, 4);
        assert_eq!(config.session_timeout_secs, 60);
    }

    #[test]
    fn test_detection_count() {
        assert!(matches!(check_detection(0), Err(SessionError::NoTagsFound)));
        assert!(check_detection(1).is_ok());
        let err = check_detection(3).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "3 tags detected");
        assert!(!SessionError::NoTagsFound.is_recoverable());
        assert!(!SessionError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_invalidate_only_cancels_running_work() {
        let controller = SessionController::new(MockReader::new(), SessionConfig::default());
        assert!(!controller.invalidate());

        lock_session(&controller.session).begin(SessionMode::Read, "");
        controller.goto_state(SessionState::Invalidated);
        // Final status already reported; the reader is being released
        assert!(!controller.invalidate());
        assert!(!*controller.cancel.borrow());

        controller.goto_state(SessionState::Operating);
        assert!(controller.invalidate());
        assert!(*controller.cancel.borrow());
    }

    #[test]
    fn test_request_modes() {
        assert_eq!(SessionRequest::read().mode(), SessionMode::Read);
        assert_eq!(SessionRequest::write("ab").mode(), SessionMode::Write);
        assert_eq!(SessionRequest::clear().mode(), SessionMode::Clear);
    }
}
