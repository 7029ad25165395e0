//! Transport layer module.

pub mod frame;
pub mod mock;
pub mod nusb;
pub mod traits;

pub use frame::FrameError;
pub use mock::MockReader;
pub use nusb::NusbReader;
pub use traits::{NdefReader, TagReader, TransportError};
