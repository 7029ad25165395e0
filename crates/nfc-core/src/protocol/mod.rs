//! Protocol module - page-memory command codec and NDEF records.

pub mod codec;
pub mod constants;
pub mod ndef;

pub use codec::{
    CodecError, MemoryPageCommand, Opcode, ascii_encode, decode_text, encode_page_text,
    encode_read_command, encode_write_command, hex_lower,
};
pub use constants::*;
pub use ndef::{NdefError, NdefMessage, NdefRecord, Tnf};
