//! Mock reader for testing.
//!
//! Simulates page memory and NDEF storage, scripts detection batches and
//! failures, and records every command it receives.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::traits::{NdefReader, TagReader, TransportError};
use crate::protocol::{MemoryPageCommand, NdefMessage, Opcode, PAGE_SIZE, READ_RESPONSE_LEN};
use crate::tag::{DetectedTag, NdefDetection, NdefStatus, NdefTag, TagHandle, TagTechnology};

/// Pages of an NTAG213 (user pages 4..=39 plus config pages).
pub const MOCK_PAGE_COUNT: usize = 45;

/// Single-page write acknowledgement.
const WRITE_ACK: u8 = 0x0A;

struct MockNdefTag {
    status: NdefStatus,
    capacity: usize,
    /// Raw NDEF bytes as stored on the tag.
    content: Option<Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    available: bool,
    detections: VecDeque<Result<Vec<DetectedTag>, TransportError>>,
    ndef_detections: VecDeque<Result<NdefDetection, TransportError>>,
    memory: HashMap<TagHandle, Vec<[u8; PAGE_SIZE]>>,
    ndef_tags: HashMap<TagHandle, MockNdefTag>,
    command_log: Vec<Vec<u8>>,
    alerts: Vec<String>,
    invalidations: Vec<String>,
    connects: usize,
    restarts: usize,
    fail_connect: bool,
    fail_reads: bool,
    fail_write_page: Option<u8>,
    fail_status_query: bool,
}

/// Scriptable reader implementing both the tag and the legacy NDEF path.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the controller owns another.
#[derive(Clone)]
pub struct MockReader {
    state: Arc<Mutex<MockState>>,
}

impl MockReader {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                available: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a blank memory-page tag and return its detection handle.
    pub fn add_memory_tag(&self, handle: u8, uid: &[u8]) -> DetectedTag {
        let handle = TagHandle(handle);
        self.state()
            .memory
            .insert(handle, vec![[0u8; PAGE_SIZE]; MOCK_PAGE_COUNT]);
        DetectedTag::new(
            TagTechnology::MemoryPage {
                identifier: uid.to_vec(),
            },
            handle,
        )
    }

    /// Store raw bytes starting at `page`, as if written earlier.
    pub fn load_pages(&self, handle: u8, page: u8, data: &[u8]) {
        let mut state = self.state();
        if let Some(memory) = state.memory.get_mut(&TagHandle(handle)) {
            for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
                let index = page as usize + i;
                if let Some(slot) = memory.get_mut(index) {
                    slot[..chunk.len()].copy_from_slice(chunk);
                }
            }
        }
    }

    /// Current content of one page.
    pub fn page(&self, handle: u8, page: u8) -> Option<[u8; PAGE_SIZE]> {
        self.state()
            .memory
            .get(&TagHandle(handle))
            .and_then(|m| m.get(page as usize).copied())
    }

    /// Queue the tags reported by the next `detect()`.
    pub fn queue_detection(&self, tags: Vec<DetectedTag>) {
        self.state().detections.push_back(Ok(tags));
    }

    pub fn queue_detection_error(&self, error: TransportError) {
        self.state().detections.push_back(Err(error));
    }

    pub fn add_ndef_tag(
        &self,
        handle: u8,
        status: NdefStatus,
        capacity: usize,
        message: Option<NdefMessage>,
    ) -> NdefTag {
        let handle = TagHandle(handle);
        self.state().ndef_tags.insert(
            handle,
            MockNdefTag {
                status,
                capacity,
                content: message.map(|m| m.to_bytes()),
            },
        );
        NdefTag { handle }
    }

    pub fn queue_ndef_detection(&self, detection: NdefDetection) {
        self.state().ndef_detections.push_back(Ok(detection));
    }

    /// Replace the stored NDEF bytes, valid or not.
    pub fn load_ndef_bytes(&self, handle: u8, bytes: &[u8]) {
        if let Some(tag) = self.state().ndef_tags.get_mut(&TagHandle(handle)) {
            tag.content = Some(bytes.to_vec());
        }
    }

    pub fn ndef_message(&self, handle: u8) -> Option<NdefMessage> {
        self.state()
            .ndef_tags
            .get(&TagHandle(handle))
            .and_then(|t| t.content.as_deref())
            .and_then(|bytes| NdefMessage::from_bytes(bytes).ok())
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Fail every connect attempt.
    pub fn fail_connect(&self) {
        self.state().fail_connect = true;
    }

    /// Fail every READ command.
    pub fn fail_reads(&self) {
        self.state().fail_reads = true;
    }

    /// Fail the WRITE command addressed to `page`.
    pub fn fail_write_at_page(&self, page: u8) {
        self.state().fail_write_page = Some(page);
    }

    pub fn fail_status_query(&self) {
        self.state().fail_status_query = true;
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state().command_log.clone()
    }

    /// Commands received with the given opcode.
    pub fn commands_with(&self, opcode: Opcode) -> Vec<MemoryPageCommand> {
        self.commands()
            .iter()
            .filter_map(|c| MemoryPageCommand::parse(c).ok())
            .filter(|c| c.opcode == opcode)
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn restart_count(&self) -> usize {
        self.state().restarts
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state().alerts.clone()
    }

    pub fn invalidations(&self) -> Vec<String> {
        self.state().invalidations.clone()
    }

    fn exchange(&self, tag: &DetectedTag, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        state.command_log.push(command.to_vec());
        trace!(handle = tag.handle.0, command = ?command, "Mock command");

        let parsed =
            MemoryPageCommand::parse(command).map_err(|_| TransportError::TagStatus(0x00))?;
        let fail_reads = state.fail_reads;
        let fail_write_page = state.fail_write_page;
        let memory = state.memory.get_mut(&tag.handle).ok_or_else(|| {
            TransportError::Unsupported(format!("{} tags have no page memory", tag.kind()))
        })?;
        let page = parsed.page as usize;
        if page >= memory.len() {
            return Err(TransportError::TagStatus(0x00));
        }

        match parsed.opcode {
            Opcode::Read => {
                if fail_reads {
                    return Err(TransportError::Timeout { timeout_ms: 500 });
                }
                let mut response = Vec::with_capacity(READ_RESPONSE_LEN);
                for i in 0..READ_RESPONSE_LEN / PAGE_SIZE {
                    // Reads past the last page roll over to page 0
                    response.extend_from_slice(&memory[(page + i) % memory.len()]);
                }
                Ok(response)
            }
            Opcode::Write => {
                if fail_write_page == Some(parsed.page) {
                    return Err(TransportError::TagLost);
                }
                memory[page].copy_from_slice(&parsed.payload);
                Ok(vec![WRITE_ACK])
            }
        }
    }
}

impl Default for MockReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TagReader for MockReader {
    fn is_available(&self) -> bool {
        self.state().available
    }

    async fn begin_polling(&self, alert: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.available {
            return Err(TransportError::Unsupported("scanning unavailable".into()));
        }
        state.alerts.push(alert.to_string());
        Ok(())
    }

    async fn detect(&self) -> Result<Vec<DetectedTag>, TransportError> {
        let next = self.state().detections.pop_front();
        match next {
            Some(result) => result,
            // Nothing in the field yet
            None => std::future::pending().await,
        }
    }

    async fn restart_polling(&self) -> Result<(), TransportError> {
        self.state().restarts += 1;
        Ok(())
    }

    async fn connect(&self, _tag: &DetectedTag) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connects += 1;
        if state.fail_connect {
            return Err(TransportError::TagLost);
        }
        Ok(())
    }

    async fn transceive(
        &self,
        tag: &DetectedTag,
        command: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.exchange(tag, command)
    }

    async fn invalidate(&self, status: &str) {
        self.state().invalidations.push(status.to_string());
    }
}

impl NdefReader for MockReader {
    async fn begin_ndef_session(&self, alert: &str) -> Result<(), TransportError> {
        TagReader::begin_polling(self, alert).await
    }

    async fn detect_ndef(&self) -> Result<NdefDetection, TransportError> {
        let next = self.state().ndef_detections.pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn restart_ndef_polling(&self) -> Result<(), TransportError> {
        TagReader::restart_polling(self).await
    }

    async fn connect_ndef(&self, tag: &NdefTag) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connects += 1;
        if state.fail_connect || !state.ndef_tags.contains_key(&tag.handle) {
            return Err(TransportError::TagLost);
        }
        Ok(())
    }

    async fn query_ndef_status(&self, tag: &NdefTag) -> Result<(NdefStatus, usize), TransportError> {
        let state = self.state();
        if state.fail_status_query {
            return Err(TransportError::Timeout { timeout_ms: 500 });
        }
        state
            .ndef_tags
            .get(&tag.handle)
            .map(|t| (t.status, t.capacity))
            .ok_or(TransportError::TagLost)
    }

    async fn read_ndef(&self, tag: &NdefTag) -> Result<NdefMessage, TransportError> {
        let state = self.state();
        if state.fail_reads {
            return Err(TransportError::Timeout { timeout_ms: 500 });
        }
        let bytes = state
            .ndef_tags
            .get(&tag.handle)
            .and_then(|t| t.content.as_deref())
            .ok_or_else(|| TransportError::ReadFailed("no NDEF message on tag".into()))?;
        NdefMessage::from_bytes(bytes).map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    async fn write_ndef(&self, tag: &NdefTag, message: &NdefMessage) -> Result<(), TransportError> {
        let mut state = self.state();
        let bytes = message.to_bytes();
        state.command_log.push(bytes.clone());
        let entry = state
            .ndef_tags
            .get_mut(&tag.handle)
            .ok_or(TransportError::TagLost)?;
        if entry.status != NdefStatus::ReadWrite {
            return Err(TransportError::WriteFailed("tag is not writable".into()));
        }
        entry.content = Some(bytes);
        Ok(())
    }

    async fn end_ndef_session(&self, status: &str) {
        TagReader::invalidate(self, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_read_command, encode_write_command};

    #[tokio::test]
    async fn test_mock_page_memory() {
        let mock = MockReader::new();
        let tag = mock.add_memory_tag(1, &[0x04, 0x01, 0x02]);
        mock.load_pages(1, 4, b"ABCD");

        let response = mock.transceive(&tag, &encode_read_command(4)).await.unwrap();
        assert_eq!(&response[..4], b"ABCD");
        assert_eq!(response.len(), READ_RESPONSE_LEN);

        let cmd = encode_write_command(5, b"WXYZ").unwrap();
        mock.transceive(&tag, &cmd).await.unwrap();
        assert_eq!(mock.page(1, 5), Some(*b"WXYZ"));
        assert_eq!(mock.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_read_rolls_over() {
        let mock = MockReader::new();
        let tag = mock.add_memory_tag(1, &[0x04]);
        mock.load_pages(1, 0, b"HEAD");
        let last = (MOCK_PAGE_COUNT - 1) as u8;
        let response = mock.transceive(&tag, &encode_read_command(last)).await.unwrap();
        assert_eq!(&response[4..8], b"HEAD");
    }

    #[tokio::test]
    async fn test_mock_write_failure_injection() {
        let mock = MockReader::new();
        let tag = mock.add_memory_tag(1, &[0x04]);
        mock.fail_write_at_page(6);

        let ok = encode_write_command(5, &[0; 4]).unwrap();
        assert!(mock.transceive(&tag, &ok).await.is_ok());
        let bad = encode_write_command(6, &[0; 4]).unwrap();
        assert!(matches!(
            mock.transceive(&tag, &bad).await,
            Err(TransportError::TagLost)
        ));
    }

    #[tokio::test]
    async fn test_mock_rejects_identity_only_tags() {
        let mock = MockReader::new();
        let tag = DetectedTag::new(
            TagTechnology::Vicinity {
                identifier: vec![0xE0, 0x04],
            },
            TagHandle(9),
        );
        let result = mock.transceive(&tag, &encode_read_command(4)).await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_mock_detection_queue() {
        let mock = MockReader::new();
        let tag = mock.add_memory_tag(1, &[0x04]);
        mock.queue_detection(vec![tag.clone()]);
        mock.queue_detection_error(TransportError::Disconnected);

        assert_eq!(mock.detect().await.unwrap(), vec![tag]);
        assert!(matches!(
            mock.detect().await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_mock_ndef_write_respects_status() {
        let mock = MockReader::new();
        let rw = mock.add_ndef_tag(1, NdefStatus::ReadWrite, 137, None);
        let ro = mock.add_ndef_tag(2, NdefStatus::ReadOnly, 137, None);
        let msg = NdefMessage::text("hello").unwrap();

        mock.write_ndef(&rw, &msg).await.unwrap();
        assert_eq!(mock.ndef_message(1), Some(msg.clone()));
        assert!(mock.write_ndef(&ro, &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_ndef_read_decodes_stored_bytes() {
        let mock = MockReader::new();
        let tag = mock.add_ndef_tag(1, NdefStatus::ReadWrite, 137, None);
        mock.load_ndef_bytes(1, &[0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i']);
        let message = mock.read_ndef(&tag).await.unwrap();
        assert_eq!(message.records[0].text_content().as_deref(), Some("hi"));

        // Length field runs past the stored bytes
        mock.load_ndef_bytes(1, &[0xD1, 0x01, 0x40, b'T', 0x02]);
        assert!(matches!(
            mock.read_ndef(&tag).await,
            Err(TransportError::ReadFailed(_))
        ));
    }
}
