//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandlerContext, OperationOutcome, OperationResult, handle_tag};
pub use machine::{Session, SessionMode, SessionState};
