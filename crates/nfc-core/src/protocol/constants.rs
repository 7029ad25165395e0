// Page-memory tag commands
pub const CMD_READ: u8 = 0x30;
pub const CMD_WRITE: u8 = 0xA2;

/// Bytes per addressable page.
pub const PAGE_SIZE: usize = 4;
/// A READ returns four consecutive pages.
pub const READ_RESPONSE_LEN: usize = 16;
pub const ZERO_PAGE: [u8; PAGE_SIZE] = [0x00; PAGE_SIZE];

/// First page past the UID / lock / capability container area.
pub const FIRST_USER_PAGE: u8 = 4;
/// Last user page of the smallest capacity class (NTAG213).
pub const LAST_USER_PAGE_NTAG213: u8 = 39;
pub const LAST_USER_PAGE_NTAG215: u8 = 129;
pub const LAST_USER_PAGE_NTAG216: u8 = 225;

pub const DEFAULT_TARGET_PAGE: u8 = 4;
pub const DEFAULT_ALERT_MESSAGE: &str = "Hold your device near the tag";
pub const COLLISION_RETRY_DELAY_MS: u64 = 500;
pub const SESSION_TIMEOUT_SECS: u64 = 60;
