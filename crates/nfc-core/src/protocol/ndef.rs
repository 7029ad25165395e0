//! NDEF message and record codec, used by the legacy message-based path.
//!
//! Record layout: header flags (MB, ME, CF, SR, IL, TNF), type length,
//! payload length (1 byte for short records, 4 bytes big-endian otherwise),
//! optional id length, then type, id and payload.

use std::io::{Cursor, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// Well-known record type "T".
pub const RTD_TEXT: &[u8] = b"T";

#[derive(Error, Debug)]
pub enum NdefError {
    #[error("Message is empty")]
    Empty,
    #[error("Chunked records are not supported")]
    Chunked,
    #[error("Unexpected end of message")]
    Truncated(#[from] std::io::Error),
    #[error("Language code too long: {0} bytes")]
    LanguageTooLong(usize),
}

/// Type Name Format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty,
    WellKnown,
    Media,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl Tnf {
    fn from_bits(bits: u8) -> Self {
        match bits & TNF_MASK {
            0x00 => Tnf::Empty,
            0x01 => Tnf::WellKnown,
            0x02 => Tnf::Media,
            0x03 => Tnf::AbsoluteUri,
            0x04 => Tnf::External,
            0x05 => Tnf::Unknown,
            0x06 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Tnf::Empty => 0x00,
            Tnf::WellKnown => 0x01,
            Tnf::Media => 0x02,
            Tnf::AbsoluteUri => 0x03,
            Tnf::External => 0x04,
            Tnf::Unknown => 0x05,
            Tnf::Unchanged => 0x06,
            Tnf::Reserved => 0x07,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: Tnf,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn empty() -> Self {
        Self {
            tnf: Tnf::Empty,
            record_type: Vec::new(),
            id: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Well-known Text record, UTF-8 encoded.
    pub fn text(text: &str, language: &str) -> Result<Self, NdefError> {
        let lang = language.as_bytes();
        if lang.len() > 0x3F {
            return Err(NdefError::LanguageTooLong(lang.len()));
        }
        let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
        payload.push(lang.len() as u8);
        payload.extend_from_slice(lang);
        payload.extend_from_slice(text.as_bytes());
        Ok(Self {
            tnf: Tnf::WellKnown,
            record_type: RTD_TEXT.to_vec(),
            id: Vec::new(),
            payload,
        })
    }

    /// Text content of a well-known Text record, if this is one.
    pub fn text_content(&self) -> Option<String> {
        if self.tnf != Tnf::WellKnown || self.record_type != RTD_TEXT {
            return None;
        }
        let status = *self.payload.first()?;
        // UTF-16 text is not produced by this crate
        if status & 0x80 != 0 {
            return None;
        }
        let start = 1 + (status & 0x3F) as usize;
        let body = self.payload.get(start..)?;
        String::from_utf8(body.to_vec()).ok()
    }

    fn encode_into(&self, buf: &mut Vec<u8>, first: bool, last: bool) {
        let short = self.payload.len() < 256;
        let mut header = self.tnf.bits();
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }

        buf.push(header);
        buf.push(self.record_type.len() as u8);
        if short {
            buf.push(self.payload.len() as u8);
        } else {
            // Writing to a Vec cannot fail
            let _ = buf.write_u32::<BigEndian>(self.payload.len() as u32);
        }
        if !self.id.is_empty() {
            buf.push(self.id.len() as u8);
        }
        buf.extend_from_slice(&self.record_type);
        buf.extend_from_slice(&self.id);
        buf.extend_from_slice(&self.payload);
    }

    fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<(Self, bool), NdefError> {
        let header = cursor.read_u8()?;
        if header & FLAG_CF != 0 {
            return Err(NdefError::Chunked);
        }
        let type_len = cursor.read_u8()? as usize;
        let payload_len = if header & FLAG_SR != 0 {
            cursor.read_u8()? as usize
        } else {
            cursor.read_u32::<BigEndian>()? as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            cursor.read_u8()? as usize
        } else {
            0
        };

        let record_type = read_field(cursor, type_len)?;
        let id = read_field(cursor, id_len)?;
        let payload = read_field(cursor, payload_len)?;

        let record = Self {
            tnf: Tnf::from_bits(header),
            record_type,
            id,
            payload,
        };
        Ok((record, header & FLAG_ME != 0))
    }
}

/// Read `len` bytes, rejecting lengths the remaining input cannot hold
/// before allocating.
fn read_field(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, NdefError> {
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(NdefError::Truncated(ErrorKind::UnexpectedEof.into()));
    }
    let mut field = vec![0u8; len];
    cursor.read_exact(&mut field)?;
    Ok(field)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Self {
        Self { records }
    }

    /// Single-record text message.
    pub fn text(text: &str) -> Result<Self, NdefError> {
        Ok(Self::new(vec![NdefRecord::text(text, "en")?]))
    }

    /// Message holding one empty record. Writing it clears a tag.
    pub fn empty() -> Self {
        Self::new(vec![NdefRecord::empty()])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let last = self.records.len().saturating_sub(1);
        for (i, record) in self.records.iter().enumerate() {
            record.encode_into(&mut buf, i == 0, i == last);
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, NdefError> {
        if data.is_empty() {
            return Err(NdefError::Empty);
        }
        let mut cursor = Cursor::new(data);
        let mut records = Vec::new();
        loop {
            let (record, last) = NdefRecord::decode_from(&mut cursor)?;
            records.push(record);
            if last || cursor.position() as usize >= data.len() {
                break;
            }
        }
        Ok(Self { records })
    }

    pub fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// First record whose raw payload is valid UTF-8.
    pub fn first_utf8_payload(&self) -> Option<String> {
        self.records
            .iter()
            .find_map(|r| String::from_utf8(r.payload.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_record_bytes() {
        let msg = NdefMessage::text("hi").unwrap();
        assert_eq!(
            msg.to_bytes(),
            vec![0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i']
        );
    }

    #[test]
    fn test_empty_message_bytes() {
        assert_eq!(NdefMessage::empty().to_bytes(), vec![0xD0, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_text_message() {
        let bytes = [0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i'];
        let msg = NdefMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg.records.len(), 1);
        assert_eq!(msg.records[0].text_content().as_deref(), Some("hi"));
    }

    #[test]
    fn test_long_record_with_id() {
        let record = NdefRecord {
            tnf: Tnf::Media,
            record_type: b"text/plain".to_vec(),
            id: b"a".to_vec(),
            payload: vec![b'x'; 300],
        };
        let msg = NdefMessage::new(vec![record.clone(), NdefRecord::empty()]);
        let bytes = msg.to_bytes();
        // MB, no SR, IL, media
        assert_eq!(bytes[0], 0x80 | 0x08 | 0x02);
        let parsed = NdefMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.records[0], record);
        assert_eq!(parsed.records[1].tnf, Tnf::Empty);
    }

    #[test]
    fn test_truncated_message() {
        let err = NdefMessage::from_bytes(&[0xD1, 0x01, 0x05, b'T', 0x02]).unwrap_err();
        assert!(matches!(err, NdefError::Truncated(_)));
        assert!(matches!(NdefMessage::from_bytes(&[]), Err(NdefError::Empty)));
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        // Long record claiming a 4 GiB payload with two bytes left
        let bytes = [0xC1, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, b'T', 0x02, b'e'];
        let err = NdefMessage::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, NdefError::Truncated(_)));
    }

    #[test]
    fn test_first_utf8_payload_skips_binary_records() {
        let binary = NdefRecord {
            tnf: Tnf::Unknown,
            record_type: Vec::new(),
            id: Vec::new(),
            payload: vec![0xFF, 0xFE],
        };
        let plain = NdefRecord {
            tnf: Tnf::Media,
            record_type: b"text/plain".to_vec(),
            id: Vec::new(),
            payload: b"first".to_vec(),
        };
        let other = NdefRecord {
            payload: b"second".to_vec(),
            ..plain.clone()
        };
        let msg = NdefMessage::new(vec![binary, plain, other]);
        assert_eq!(msg.first_utf8_payload().as_deref(), Some("first"));
    }
}
