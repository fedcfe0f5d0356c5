//! The FIFO of frames waiting to be written.

use std::collections::VecDeque;

use super::client::Blob;
use crate::protocol::frame::coding::{Control, Data, OpCode};

/// Whether the queue still accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Messages may be queued.
    Open,
    /// The Close reply is queued; the transport closes once everything is written.
    Closing,
    /// Nothing more is written.
    Closed,
}

/// Where the bytes of a queued frame come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedPayload {
    /// UTF-8 text.
    Text(String),
    /// Inline bytes.
    Binary(Vec<u8>),
    /// Bytes to be loaded first.
    Blob(Blob),
}

/// One frame waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    /// The frame opcode.
    pub opcode: OpCode,
    /// The payload source.
    pub payload: QueuedPayload,
    /// How much this frame adds to the consumer's buffered amount.
    pub accounted: u64,
}

impl QueuedFrame {
    /// A text message.
    pub fn text(message: String) -> Self {
        let accounted = message.len() as u64;
        Self { opcode: OpCode::Data(Data::Text), payload: QueuedPayload::Text(message), accounted }
    }

    /// A binary message.
    pub fn binary(data: Vec<u8>) -> Self {
        let accounted = data.len() as u64;
        Self { opcode: OpCode::Data(Data::Binary), payload: QueuedPayload::Binary(data), accounted }
    }

    /// A blob-backed binary message.
    pub fn blob(blob: Blob) -> Self {
        let accounted = blob.size;
        Self { opcode: OpCode::Data(Data::Binary), payload: QueuedPayload::Blob(blob), accounted }
    }

    /// A control frame; never counted in the buffered amount.
    pub fn control(opcode: Control, payload: Vec<u8>) -> Self {
        Self { opcode: OpCode::Control(opcode), payload: QueuedPayload::Binary(payload), accounted: 0 }
    }
}

/// Progress of the single blob load the queue may have in flight.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum BlobLoad {
    /// No load for the head entry yet.
    #[default]
    NotStarted,
    /// Waiting for the reader.
    Started,
    /// The reader reported an error.
    Failed,
    /// Loaded; the bytes belong to the head entry.
    Finished(Vec<u8>),
}

/// Outgoing frames in transmission order.
#[derive(Debug)]
pub struct OutgoingQueue {
    frames: VecDeque<QueuedFrame>,
    status: QueueStatus,
    blob: BlobLoad,
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutgoingQueue {
    /// An empty, open queue.
    pub fn new() -> Self {
        Self { frames: VecDeque::new(), status: QueueStatus::Open, blob: BlobLoad::NotStarted }
    }

    /// Appends to the back.
    pub fn push_back(&mut self, frame: QueuedFrame) {
        self.frames.push_back(frame);
    }

    /// Puts an entry back at the head, to be retried.
    pub fn push_front(&mut self, frame: QueuedFrame) {
        self.frames.push_front(frame);
    }

    /// Takes the head entry.
    pub fn pop_front(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    /// Number of waiting frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Current status.
    pub fn status(&self) -> QueueStatus {
        self.status
    }

    /// Changes the status.
    pub fn set_status(&mut self, status: QueueStatus) {
        self.status = status;
    }

    /// State of the blob load for the head entry.
    pub fn blob_load(&self) -> &BlobLoad {
        &self.blob
    }

    /// Records blob load progress.
    pub fn set_blob_load(&mut self, load: BlobLoad) {
        self.blob = load;
    }

    /// Takes loaded bytes and resets the loader for the next blob.
    pub fn take_loaded_blob(&mut self) -> Option<Vec<u8>> {
        match std::mem::take(&mut self.blob) {
            BlobLoad::Finished(bytes) => Some(bytes),
            other => {
                self.blob = other;
                None
            },
        }
    }

    /// Drops every entry and closes the queue.
    pub fn abort(&mut self) {
        self.frames.clear();
        self.status = QueueStatus::Closed;
    }
}
