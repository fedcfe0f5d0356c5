//! Reassembly of fragmented data messages.

use std::fmt::Display;

use crate::{
    error::{CapacityError, Error, ProtocolError, Result},
    protocol::frame::coding::Data,
};

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A UTF-8 text message
    Text(String),
    /// A binary message
    Binary(Vec<u8>),
}

impl Message {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the message into its bytes.
    pub fn into_data(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) => b,
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Text(s) => write!(f, "Text({s})"),
            Message::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

/// Accumulates the fragments of at most one message at a time.
#[derive(Debug)]
pub struct MessageAssembler {
    incomplete: Option<(Data, Vec<u8>)>,
    max_size: Option<usize>,
}

impl MessageAssembler {
    /// Creates an empty assembler; `max_size` bounds a complete message.
    pub fn new(max_size: Option<usize>) -> Self {
        Self { incomplete: None, max_size }
    }

    /// Whether a fragmented message is in progress.
    pub fn in_progress(&self) -> bool {
        self.incomplete.is_some()
    }

    /// Feeds one data frame (already inflated).
    ///
    /// The accumulator is emptied before the finished message is returned, so the
    /// caller may hand it to code that re-enters the channel.
    pub fn push(&mut self, opcode: Data, fin: bool, payload: &[u8]) -> Result<Option<Message>> {
        match opcode {
            Data::Continuation => {
                let Some((_, data)) = self.incomplete.as_mut() else {
                    return Err(Error::Protocol(ProtocolError::UnexpectedContinue));
                };
                check_size(data.len().saturating_add(payload.len()), self.max_size)?;
                data.extend_from_slice(payload);

                if !fin {
                    return Ok(None);
                }
                match self.incomplete.take() {
                    Some((opcode, data)) => finish(opcode, data).map(Some),
                    None => Ok(None),
                }
            },
            Data::Text | Data::Binary => {
                if self.in_progress() {
                    return Err(Error::Protocol(ProtocolError::ExpectedFragment(opcode)));
                }
                check_size(payload.len(), self.max_size)?;

                if fin {
                    finish(opcode, payload.to_vec()).map(Some)
                } else {
                    self.incomplete = Some((opcode, payload.to_vec()));
                    Ok(None)
                }
            },
            Data::Reserved(code) => Err(Error::Protocol(ProtocolError::UnknownOpCode(code))),
        }
    }

    /// Forgets any partial message.
    pub fn clear(&mut self) {
        self.incomplete = None;
    }
}

fn check_size(size: usize, max_size: Option<usize>) -> Result<()> {
    match max_size {
        Some(max) if size > max => Err(Error::Capacity(CapacityError::MessageTooLarge { size, max })),
        _ => Ok(()),
    }
}

fn finish(opcode: Data, data: Vec<u8>) -> Result<Message> {
    match opcode {
        Data::Text => String::from_utf8(data)
            .map(Message::Text)
            .map_err(|_| Error::Protocol(ProtocolError::InvalidUtf8)),
        _ => Ok(Message::Binary(data)),
    }
}
