//! NFC-Core: near-field tag session management in Rust.
//!
//! This crate discovers proximity tags, classifies them by technology
//! family and reads, writes or clears the text stored on page-addressed
//! memory tags, reporting every step to an observer.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Page command codec, text decoding, NDEF records
//! - **Transport**: Reader abstraction (nusb PN533, mock)
//! - **State**: Session state machine and per-technology handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Controller that owns the polling lifecycle
//!
//! # Example
//!
//! ```no_run
//! use nfc_core::session::{SessionConfig, SessionController, SessionRequest};
//! use nfc_core::transport::NusbReader;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let reader = NusbReader::open()?;
//! let controller = SessionController::new(reader, SessionConfig::default());
//! let outcome = controller.start_session(SessionRequest::write("abcd")).await?;
//! println!("{}", outcome.message);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod protocol;
pub mod session;
pub mod state;
pub mod tag;
pub mod transport;

// Re-exports for convenience
pub use events::{
    CollectingObserver, DispatchObserver, IdentityField, NullObserver, SessionObserver, TagEvent,
    TracingObserver,
};
pub use protocol::{CodecError, MemoryPageCommand, NdefMessage, NdefRecord, Opcode};
pub use session::{SessionConfig, SessionController, SessionError, SessionRequest};
pub use state::{OperationOutcome, OperationResult, SessionMode, SessionState};
pub use tag::{DetectedTag, TagCapacity, TagHandle, TagKind, TagTechnology};
pub use transport::{MockReader, NdefReader, NusbReader, TagReader, TransportError};
