//! Detected tag handles and technology families.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    FIRST_USER_PAGE, LAST_USER_PAGE_NTAG213, LAST_USER_PAGE_NTAG215, LAST_USER_PAGE_NTAG216,
    NdefMessage, hex_lower,
};

/// Opaque per-detection handle. Only the reader backend that produced it
/// knows what it refers to (a PN533 target number, a mock slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagHandle(pub u8);

/// Technology family with the identity data each family exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTechnology {
    /// Page-addressed memory tag (MIFARE Ultralight / NTAG).
    MemoryPage { identifier: Vec<u8> },
    /// ISO 7816 smart card over ISO 14443-4.
    SmartCard {
        identifier: Vec<u8>,
        application_data: Option<Vec<u8>>,
        historical_bytes: Option<Vec<u8>>,
    },
    /// ISO 15693 vicinity tag.
    Vicinity { identifier: Vec<u8> },
    /// FeliCa contactless IC.
    ContactlessIc {
        current_idm: Vec<u8>,
        system_code: Vec<u8>,
    },
    /// Anything the backend sensed but could not place in a family.
    Unknown { description: String },
}

impl TagTechnology {
    pub fn kind(&self) -> TagKind {
        match self {
            TagTechnology::MemoryPage { .. } => TagKind::MemoryPage,
            TagTechnology::SmartCard { .. } => TagKind::SmartCard,
            TagTechnology::Vicinity { .. } => TagKind::Vicinity,
            TagTechnology::ContactlessIc { .. } => TagKind::ContactlessIc,
            TagTechnology::Unknown { .. } => TagKind::Unknown,
        }
    }

    pub fn identifier(&self) -> &[u8] {
        match self {
            TagTechnology::MemoryPage { identifier }
            | TagTechnology::SmartCard { identifier, .. }
            | TagTechnology::Vicinity { identifier } => identifier,
            TagTechnology::ContactlessIc { current_idm, .. } => current_idm,
            TagTechnology::Unknown { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    MemoryPage,
    SmartCard,
    Vicinity,
    ContactlessIc,
    Unknown,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagKind::MemoryPage => write!(f, "MIFARE"),
            TagKind::SmartCard => write!(f, "ISO7816"),
            TagKind::Vicinity => write!(f, "ISO15693"),
            TagKind::ContactlessIc => write!(f, "FeliCa"),
            TagKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One physically sensed tag during one detection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTag {
    pub technology: TagTechnology,
    pub handle: TagHandle,
}

impl DetectedTag {
    pub fn new(technology: TagTechnology, handle: TagHandle) -> Self {
        Self { technology, handle }
    }

    pub fn kind(&self) -> TagKind {
        self.technology.kind()
    }

    pub fn uid_hex(&self) -> String {
        hex_lower(self.technology.identifier())
    }
}

/// NDEF capability reported by a legacy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefStatus {
    NotSupported,
    ReadOnly,
    ReadWrite,
}

/// NDEF-capable tag handle on the legacy path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefTag {
    pub handle: TagHandle,
}

/// What a legacy backend reports for one detection batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdefDetection {
    /// Messages already read by the backend.
    Messages(Vec<NdefMessage>),
    /// Tags that need an explicit connect / query / read-or-write exchange.
    Tags(Vec<NdefTag>),
}

/// User memory layout of common memory-page tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCapacity {
    #[default]
    Ntag213,
    Ntag215,
    Ntag216,
}

impl TagCapacity {
    pub fn user_pages(self) -> RangeInclusive<u8> {
        let last = match self {
            TagCapacity::Ntag213 => LAST_USER_PAGE_NTAG213,
            TagCapacity::Ntag215 => LAST_USER_PAGE_NTAG215,
            TagCapacity::Ntag216 => LAST_USER_PAGE_NTAG216,
        };
        FIRST_USER_PAGE..=last
    }
}

impl fmt::Display for TagCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagCapacity::Ntag213 => write!(f, "ntag213"),
            TagCapacity::Ntag215 => write!(f, "ntag215"),
            TagCapacity::Ntag216 => write!(f, "ntag216"),
        }
    }
}

impl FromStr for TagCapacity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ntag213" => Ok(TagCapacity::Ntag213),
            "ntag215" => Ok(TagCapacity::Ntag215),
            "ntag216" => Ok(TagCapacity::Ntag216),
            other => Err(format!("unknown tag type: {}", other)),
        }
    }
}
