//! Page-memory command codec.
//!
//! Memory-page tags are addressed in 4-byte pages. A READ (`0x30`) returns
//! 16 bytes starting at the requested page; a WRITE (`0xA2`) stores exactly
//! one page.

use std::fmt;

use thiserror::Error;

use super::constants::{CMD_READ, CMD_WRITE, PAGE_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid payload size: expected {expected} bytes, got {actual}")]
    InvalidPayloadSize { expected: usize, actual: usize },

    #[error("Invalid text encoding: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    #[error("Non-ASCII character {ch:?} at position {index}")]
    NonAsciiCharacter { ch: char, index: usize },

    #[error("Unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Command truncated: {0} bytes")]
    Truncated(usize),
}

/// Page-memory command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
}

impl Opcode {
    pub const fn code(self) -> u8 {
        match self {
            Opcode::Read => CMD_READ,
            Opcode::Write => CMD_WRITE,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            CMD_READ => Ok(Opcode::Read),
            CMD_WRITE => Ok(Opcode::Write),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Read => write!(f, "READ"),
            Opcode::Write => write!(f, "WRITE"),
        }
    }
}

/// A single page-memory command. Built per operation and serialized immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPageCommand {
    pub opcode: Opcode,
    pub page: u8,
    pub payload: Vec<u8>,
}

impl MemoryPageCommand {
    pub fn read(page: u8) -> Self {
        Self {
            opcode: Opcode::Read,
            page,
            payload: Vec::new(),
        }
    }

    pub fn write(page: u8, data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != PAGE_SIZE {
            return Err(CodecError::InvalidPayloadSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            opcode: Opcode::Write,
            page,
            payload: data.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.payload.len());
        buf.push(self.opcode.code());
        buf.push(self.page);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a serialized command (as captured on the wire).
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 2 {
            return Err(CodecError::Truncated(bytes.len()));
        }
        match Opcode::from_code(bytes[0])? {
            Opcode::Read => Ok(Self::read(bytes[1])),
            Opcode::Write => Self::write(bytes[1], &bytes[2..]),
        }
    }
}

/// `[0x30, page]`
pub fn encode_read_command(page: u8) -> Vec<u8> {
    MemoryPageCommand::read(page).to_bytes()
}

/// `[0xA2, page, d0, d1, d2, d3]`
pub fn encode_write_command(page: u8, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(MemoryPageCommand::write(page, data)?.to_bytes())
}

/// Decode page data as text, truncated at the first NUL byte.
///
/// `Ok("")` means the tag holds no text; `Err` means the bytes are not UTF-8.
/// Callers branch on both.
pub fn decode_text(response: &[u8]) -> Result<String, CodecError> {
    let end = response
        .iter()
        .position(|&b| b == 0x00)
        .unwrap_or(response.len());
    let text = std::str::from_utf8(&response[..end])?;
    Ok(text.to_string())
}

pub fn ascii_encode(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .enumerate()
        .map(|(index, ch)| {
            if ch.is_ascii() {
                Ok(ch as u8)
            } else {
                Err(CodecError::NonAsciiCharacter { ch, index })
            }
        })
        .collect()
}

/// ASCII-encode `text` into one page, zero-padding short text.
pub fn encode_page_text(text: &str) -> Result<[u8; PAGE_SIZE], CodecError> {
    let bytes = ascii_encode(text)?;
    if bytes.len() > PAGE_SIZE {
        return Err(CodecError::InvalidPayloadSize {
            expected: PAGE_SIZE,
            actual: bytes.len(),
        });
    }
    let mut page = [0u8; PAGE_SIZE];
    page[..bytes.len()].copy_from_slice(&bytes);
    Ok(page)
}

/// Lowercase hex without separators, e.g. `04a1b2c3`.
pub fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_command() {
        assert_eq!(encode_read_command(4), vec![0x30, 0x04]);
        assert_eq!(encode_read_command(255), vec![0x30, 0xFF]);
    }

    #[test]
    fn test_write_command() {
        let cmd = encode_write_command(4, b"ABCD").unwrap();
        assert_eq!(cmd, vec![0xA2, 0x04, b'A', b'B', b'C', b'D']);
    }

    #[test]
    fn test_write_command_rejects_wrong_size() {
        let err = encode_write_command(4, b"ABC").unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidPayloadSize {
                expected: 4,
                actual: 3
            }
        );
        assert!(encode_write_command(4, &[0u8; 16]).is_err());
        assert!(encode_write_command(4, &[]).is_err());
    }

    #[test]
    fn test_decode_text_stops_at_nul() {
        let mut data = ascii_encode("ABCD").unwrap();
        data.extend_from_slice(&[0u8; 12]);
        assert_eq!(decode_text(&data).unwrap(), "ABCD");
    }

    #[test]
    fn test_decode_text_without_nul_uses_whole_buffer() {
        assert_eq!(decode_text(b"hello world!1234").unwrap(), "hello world!1234");
    }

    #[test]
    fn test_decode_text_empty_and_invalid_are_distinct() {
        assert_eq!(decode_text(&[0u8; 16]).unwrap(), "");
        let err = decode_text(&[0xFF, 0xFE, 0x41, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidEncoding(_)));
    }

    #[test]
    fn test_ascii_encode_rejects_non_ascii() {
        assert_eq!(ascii_encode("Hi!").unwrap(), b"Hi!".to_vec());
        let err = ascii_encode("caf\u{e9}").unwrap_err();
        assert_eq!(
            err,
            CodecError::NonAsciiCharacter {
                ch: '\u{e9}',
                index: 3
            }
        );
    }

    #[test]
    fn test_encode_page_text_pads_and_limits() {
        assert_eq!(encode_page_text("AB").unwrap(), [b'A', b'B', 0, 0]);
        assert_eq!(encode_page_text("ABCD").unwrap(), *b"ABCD");
        assert!(matches!(
            encode_page_text("ABCDE"),
            Err(CodecError::InvalidPayloadSize { actual: 5, .. })
        ));
    }

    #[test]
    fn test_parse_command() {
        let cmd = MemoryPageCommand::parse(&[0xA2, 0x07, 0, 0, 0, 0]).unwrap();
        assert_eq!(cmd.opcode, Opcode::Write);
        assert_eq!(cmd.page, 7);
        assert_eq!(cmd.payload, vec![0; 4]);

        assert_eq!(
            MemoryPageCommand::parse(&[0x1B, 0x00]),
            Err(CodecError::UnknownOpcode(0x1B))
        );
        assert_eq!(MemoryPageCommand::parse(&[0x30]), Err(CodecError::Truncated(1)));
    }

    #[test]
    fn test_hex_lower() {
        assert_eq!(hex_lower(&[0x04, 0xA1, 0xB2, 0xFF]), "04a1b2ff");
        assert_eq!(hex_lower(&[]), "");
    }
}
