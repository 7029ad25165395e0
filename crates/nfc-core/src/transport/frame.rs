//! PN533 host-controller frames.
//!
//! Normal information frame:
//! `00 00 FF LEN LCS TFI PD0..PDn DCS 00`, where `LEN` counts `TFI` plus
//! data, `LCS` makes `LEN + LCS == 0` and `DCS` makes the data sum zero.
//! Frames longer than 255 bytes use the extended form with a 16-bit length.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::tag::TagTechnology;

pub const PREAMBLE: [u8; 3] = [0x00, 0x00, 0xFF];
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
pub const NACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

pub const TFI_HOST: u8 = 0xD4;
pub const TFI_READER: u8 = 0xD5;
const TFI_ERROR: u8 = 0x7F;

pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
pub const CMD_RF_CONFIGURATION: u8 = 0x32;
pub const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
pub const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
pub const CMD_IN_RELEASE: u8 = 0x52;
pub const CMD_IN_SELECT: u8 = 0x54;

/// InListPassiveTarget baud rate / modulation.
pub const BRTY_106_TYPE_A: u8 = 0x00;
pub const BRTY_212_FELICA: u8 = 0x01;

/// FeliCa polling: wildcard system code, request system code, one slot.
pub const FELICA_POLLING_REQUEST: [u8; 5] = [0x00, 0xFF, 0xFF, 0x01, 0x00];

/// SEL_RES bit set by ISO 14443-4 compliant targets.
const SEL_RES_ISO14443_4: u8 = 0x20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Missing frame preamble")]
    MissingPreamble,
    #[error("Frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Length checksum mismatch")]
    LengthChecksum,
    #[error("Data checksum mismatch")]
    DataChecksum,
    #[error("Reader reported an application error")]
    ErrorFrame,
    #[error("Reader sent NACK")]
    Nack,
    #[error("Unexpected frame identifier 0x{0:02X}")]
    UnexpectedTfi(u8),
    #[error("Unexpected response code: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedResponse { expected: u8, actual: u8 },
    #[error("Malformed target data")]
    MalformedTarget,
}

impl From<std::io::Error> for FrameError {
    fn from(_: std::io::Error) -> Self {
        FrameError::MalformedTarget
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// Build a host-to-reader frame for `command`.
pub fn encode_frame(command: u8, params: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + params.len());
    data.push(TFI_HOST);
    data.push(command);
    data.extend_from_slice(params);

    let mut frame = Vec::with_capacity(data.len() + 10);
    frame.extend_from_slice(&PREAMBLE);
    if data.len() <= 0xFF {
        let len = data.len() as u8;
        frame.push(len);
        frame.push(len.wrapping_neg());
    } else {
        let len = data.len() as u16;
        frame.extend_from_slice(&[0xFF, 0xFF]);
        // Writing to a Vec cannot fail
        let _ = frame.write_u16::<BigEndian>(len);
        frame.push(checksum(&len.to_be_bytes()));
    }
    frame.extend_from_slice(&data);
    frame.push(checksum(&data));
    frame.push(0x00);
    frame
}

pub fn is_ack(bytes: &[u8]) -> bool {
    bytes.starts_with(&ACK_FRAME)
}

/// Validate a reader-to-host frame answering `command` and return its data
/// (everything after the response code).
pub fn decode_frame(bytes: &[u8], command: u8) -> Result<Vec<u8>, FrameError> {
    if bytes.starts_with(&NACK_FRAME) {
        return Err(FrameError::Nack);
    }
    // Readers may prefix frames with extra zero bytes
    let start = bytes
        .windows(PREAMBLE.len())
        .position(|w| w == &PREAMBLE[..])
        .ok_or(FrameError::MissingPreamble)?;
    let frame = &bytes[start + PREAMBLE.len()..];
    if frame.len() < 2 {
        return Err(FrameError::Truncated {
            expected: 2,
            actual: frame.len(),
        });
    }

    let (len, body) = if frame[0] == 0xFF && frame[1] == 0xFF {
        if frame.len() < 5 {
            return Err(FrameError::Truncated {
                expected: 5,
                actual: frame.len(),
            });
        }
        if checksum(&frame[2..4]) != frame[4] {
            return Err(FrameError::LengthChecksum);
        }
        let len = Cursor::new(&frame[2..4]).read_u16::<BigEndian>()? as usize;
        (len, &frame[5..])
    } else {
        if frame[0].wrapping_add(frame[1]) != 0 {
            return Err(FrameError::LengthChecksum);
        }
        (frame[0] as usize, &frame[2..])
    };

    if body.len() < len + 1 {
        return Err(FrameError::Truncated {
            expected: len + 1,
            actual: body.len(),
        });
    }
    let data = &body[..len];
    if checksum(data) != body[len] {
        return Err(FrameError::DataChecksum);
    }

    match data.first() {
        Some(&TFI_READER) => {}
        Some(&TFI_ERROR) => return Err(FrameError::ErrorFrame),
        Some(&other) => return Err(FrameError::UnexpectedTfi(other)),
        None => {
            return Err(FrameError::Truncated {
                expected: 1,
                actual: 0,
            });
        }
    }
    let expected = command.wrapping_add(1);
    match data.get(1) {
        Some(&code) if code == expected => Ok(data[2..].to_vec()),
        Some(&code) => Err(FrameError::UnexpectedResponse {
            expected,
            actual: code,
        }),
        None => Err(FrameError::Truncated {
            expected: 2,
            actual: 1,
        }),
    }
}

/// One target from an InListPassiveTarget response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedTarget {
    /// Logical target number used by InDataExchange / InRelease.
    pub tg: u8,
    pub technology: TagTechnology,
}

/// Parse a 106 kbps type A InListPassiveTarget response.
pub fn parse_type_a_targets(data: &[u8]) -> Result<Vec<ListedTarget>, FrameError> {
    let mut cursor = Cursor::new(data);
    let count = cursor.read_u8()?;
    let mut targets = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let tg = cursor.read_u8()?;
        let sens_res = cursor.read_u16::<BigEndian>()?;
        let sel_res = cursor.read_u8()?;
        let uid_len = cursor.read_u8()? as usize;
        let mut uid = vec![0u8; uid_len];
        cursor.read_exact(&mut uid)?;

        let technology = if sel_res & SEL_RES_ISO14443_4 != 0 {
            let ats_len = cursor.read_u8()? as usize;
            if ats_len == 0 {
                return Err(FrameError::MalformedTarget);
            }
            let mut ats = vec![0u8; ats_len - 1];
            cursor.read_exact(&mut ats)?;
            TagTechnology::SmartCard {
                identifier: uid,
                application_data: None,
                historical_bytes: historical_bytes(&ats),
            }
        } else if sel_res == 0x00 {
            TagTechnology::MemoryPage { identifier: uid }
        } else {
            TagTechnology::Unknown {
                description: format!(
                    "ISO14443A SENS_RES=0x{:04X} SEL_RES=0x{:02X}",
                    sens_res, sel_res
                ),
            }
        };
        targets.push(ListedTarget { tg, technology });
    }
    Ok(targets)
}

/// Historical bytes from an ATS with its length byte stripped.
fn historical_bytes(ats: &[u8]) -> Option<Vec<u8>> {
    let (&t0, rest) = ats.split_first()?;
    // TA, TB, TC interface bytes are present when bits 4..6 of T0 are set
    let interface_bytes = [0x10u8, 0x20, 0x40]
        .iter()
        .filter(|&&bit| t0 & bit != 0)
        .count();
    rest.get(interface_bytes..)
        .filter(|hb| !hb.is_empty())
        .map(<[u8]>::to_vec)
}

/// Parse a 212 kbps FeliCa InListPassiveTarget response.
pub fn parse_felica_targets(data: &[u8]) -> Result<Vec<ListedTarget>, FrameError> {
    let mut cursor = Cursor::new(data);
    let count = cursor.read_u8()?;
    let mut targets = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let tg = cursor.read_u8()?;
        let pol_len = cursor.read_u8()? as usize;
        // POL_RES: length byte, response code, IDm, PMm, [system code]
        if pol_len < 18 {
            return Err(FrameError::MalformedTarget);
        }
        let _response_code = cursor.read_u8()?;
        let mut idm = vec![0u8; 8];
        cursor.read_exact(&mut idm)?;
        let mut pmm = [0u8; 8];
        cursor.read_exact(&mut pmm)?;
        let mut system_code = vec![0u8; pol_len - 18];
        cursor.read_exact(&mut system_code)?;

        targets.push(ListedTarget {
            tg,
            technology: TagTechnology::ContactlessIc {
                current_idm: idm,
                system_code,
            },
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_frame(data: &[u8]) -> Vec<u8> {
        let mut frame = PREAMBLE.to_vec();
        frame.push(data.len() as u8);
        frame.push((data.len() as u8).wrapping_neg());
        frame.extend_from_slice(data);
        frame.push(checksum(data));
        frame.push(0x00);
        frame
    }

    #[test]
    fn test_encode_get_firmware_version() {
        assert_eq!(
            encode_frame(CMD_GET_FIRMWARE_VERSION, &[]),
            vec![0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_encode_extended_frame() {
        let params = vec![0x11u8; 300];
        let frame = encode_frame(CMD_IN_DATA_EXCHANGE, &params);
        assert_eq!(&frame[3..5], &[0xFF, 0xFF]);
        assert_eq!(&frame[5..7], &302u16.to_be_bytes());
        assert_eq!(frame[5].wrapping_add(frame[6]).wrapping_add(frame[7]), 0);
        assert_eq!(frame.len(), 8 + 302 + 2);
    }

    #[test]
    fn test_decode_response() {
        let frame = reader_frame(&[TFI_READER, CMD_IN_DATA_EXCHANGE + 1, 0x00, 0x41, 0x42]);
        let data = decode_frame(&frame, CMD_IN_DATA_EXCHANGE).unwrap();
        assert_eq!(data, vec![0x00, 0x41, 0x42]);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut frame = reader_frame(&[TFI_READER, 0x41, 0x00]);
        let dcs = frame.len() - 2;
        frame[dcs] ^= 0xFF;
        assert_eq!(
            decode_frame(&frame, CMD_IN_DATA_EXCHANGE),
            Err(FrameError::DataChecksum)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_response_code() {
        let frame = reader_frame(&[TFI_READER, 0x4B, 0x00]);
        assert_eq!(
            decode_frame(&frame, CMD_IN_DATA_EXCHANGE),
            Err(FrameError::UnexpectedResponse {
                expected: 0x41,
                actual: 0x4B
            })
        );
    }

    #[test]
    fn test_decode_error_frame_and_nack() {
        let frame = reader_frame(&[0x7F]);
        assert_eq!(decode_frame(&frame, 0x40), Err(FrameError::ErrorFrame));
        assert_eq!(decode_frame(&NACK_FRAME, 0x40), Err(FrameError::Nack));
        assert!(is_ack(&ACK_FRAME));
    }

    #[test]
    fn test_parse_memory_page_target() {
        let data = [
            0x01, 0x01, 0x00, 0x44, 0x00, 0x07, 0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
        ];
        let targets = parse_type_a_targets(&data).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].tg, 1);
        assert_eq!(
            targets[0].technology,
            TagTechnology::MemoryPage {
                identifier: vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]
            }
        );
    }

    #[test]
    fn test_parse_smart_card_target_with_ats() {
        // ATS: TL=6, T0=0x75 (TA, TB, TC present), TA, TB, TC, one historical byte
        let data = [
            0x01, 0x01, 0x03, 0x04, 0x20, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0x06, 0x75, 0x77, 0x81,
            0x02, 0x80,
        ];
        let targets = parse_type_a_targets(&data).unwrap();
        assert_eq!(
            targets[0].technology,
            TagTechnology::SmartCard {
                identifier: vec![0xDE, 0xAD, 0xBE, 0xEF],
                application_data: None,
                historical_bytes: Some(vec![0x80]),
            }
        );
    }

    #[test]
    fn test_parse_two_targets_reports_collision_count() {
        let data = [
            0x02, 0x01, 0x00, 0x44, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04, 0x02, 0x00, 0x04, 0x08,
            0x04, 0x05, 0x06, 0x07, 0x08,
        ];
        let targets = parse_type_a_targets(&data).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(matches!(
            targets[1].technology,
            TagTechnology::Unknown { .. }
        ));
    }

    #[test]
    fn test_parse_felica_target() {
        let mut data = vec![0x01, 0x01, 0x14, 0x01];
        data.extend_from_slice(&[0x01, 0x2E, 0x3C, 0x4D, 0x5E, 0x6F, 0x70, 0x81]);
        data.extend_from_slice(&[0x00; 8]);
        data.extend_from_slice(&[0x88, 0xB4]);
        let targets = parse_felica_targets(&data).unwrap();
        assert_eq!(
            targets[0].technology,
            TagTechnology::ContactlessIc {
                current_idm: vec![0x01, 0x2E, 0x3C, 0x4D, 0x5E, 0x6F, 0x70, 0x81],
                system_code: vec![0x88, 0xB4],
            }
        );
    }

    #[test]
    fn test_parse_truncated_target() {
        assert_eq!(
            parse_type_a_targets(&[0x01, 0x01, 0x00]),
            Err(FrameError::MalformedTarget)
        );
    }
}
