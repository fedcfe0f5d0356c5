//! WebSocket Frame module

use std::fmt::Display;

use bytes::{BufMut, Bytes};

use super::{
    coding::{Control, Data, OpCode},
    mask::{apply_mask, generate},
};
use crate::{error::ProtocolError, MAX_CONTROL_FRAME_PAYLOAD};

/// Which end of the connection this endpoint is.
///
/// Decides masking on both directions: clients mask everything they send and
/// reject masked input, servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client mode
    Client,
    /// Server mode
    Server,
}

/// A struct representing a WebSocket frame header.
#[allow(missing_copy_implementations)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates is the frame is the last one of a possibly fragmented message
    pub fin: bool,
    /// Claimed by permessage-deflate as the "compressed" bit.
    pub rsv1: bool,
    /// Reserved for protocol extensions.
    pub rsv2: bool,
    /// Reserved for protocol extensions.
    pub rsv3: bool,
    /// WebSocket protocol opcode.
    pub opcode: OpCode,
    /// A frame mask (if any)
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Control(Control::Close),
            mask: None,
        }
    }
}

impl FrameHeader {
    /// Get the size of the header formatted with given payload length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self, length: u64) -> usize {
        2 + Length::for_len(length).additional() + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Format a header for given payload size.
    pub fn format(&self, length: u64, output: &mut impl BufMut) {
        let code: u8 = self.opcode.into();

        let first_byte = code
            | if self.fin { 0x80 } else { 0 }
            | if self.rsv1 { 0x40 } else { 0 }
            | if self.rsv2 { 0x20 } else { 0 }
            | if self.rsv3 { 0x10 } else { 0 };

        let len = Length::for_len(length);
        let second_byte = len.len_byte() | if self.mask.is_some() { 0x80 } else { 0 };

        output.put_slice(&[first_byte, second_byte]);

        match len {
            Length::U8(_) => (),
            Length::U16 => output.put_u16(length as u16),
            Length::U64 => output.put_u64(length),
        }

        if let Some(ref mask) = self.mask {
            output.put_slice(mask);
        }
    }

    /// Generate a random frame mask and store this in the header.
    ///
    /// Of course this does not change frame contents. It just generates a mask.
    pub(crate) fn set_random_mask(&mut self) {
        self.mask = Some(generate());
    }

    /// Parse a header from the front of `input`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. On success yields the header, the
    /// payload length and the number of header bytes.
    ///
    /// Violations that can be judged from the header alone are reported here, so a
    /// hostile peer cannot make us buffer a huge payload before failing.
    pub fn parse(input: &[u8], role: Role) -> Result<Option<(Self, u64, usize)>, ProtocolError> {
        if input.len() < 2 {
            return Ok(None);
        }

        let (a, b) = (input[0], input[1]);

        let fin = a & 0x80 != 0;
        let rsv1 = a & 0x40 != 0;
        let rsv2 = a & 0x20 != 0;
        let rsv3 = a & 0x10 != 0;
        let opcode = OpCode::from(a & 0x0F);
        let masked = b & 0x80 != 0;
        let len_byte = b & 0x7F;

        if opcode.is_reserved() {
            return Err(ProtocolError::UnknownOpCode(a & 0x0F));
        }

        if let OpCode::Control(ctl) = opcode {
            if !fin {
                return Err(ProtocolError::FragmentedControlFrame(ctl));
            }
            // All control frames MUST have a payload length of 125 bytes or less,
            // so they never carry an extended length field. (RFC 6455)
            if usize::from(len_byte) > MAX_CONTROL_FRAME_PAYLOAD {
                let declared = declared_length(input, len_byte).unwrap_or(u64::from(len_byte));
                return Err(ProtocolError::ControlFrameTooBig(declared));
            }
        }

        match (role, masked) {
            (Role::Client, true) => return Err(ProtocolError::MaskedFrameFromServer),
            (Role::Server, false) => return Err(ProtocolError::UnmaskedFrameFromClient),
            _ => (),
        }

        let extra = Length::for_byte(len_byte).additional();
        let Some(length) = declared_length(input, len_byte) else {
            return Ok(None);
        };

        if length & (1 << 63) != 0 || usize::try_from(length).is_err() {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        let mut header_len = 2 + extra;
        let mask = if masked {
            let Some(key) = input.get(header_len..header_len + 4) else {
                return Ok(None);
            };
            header_len += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let header = FrameHeader { fin, rsv1, rsv2, rsv3, opcode, mask };
        Ok(Some((header, length, header_len)))
    }
}

/// Read the payload length declared by the header, following the extended fields.
fn declared_length(input: &[u8], len_byte: u8) -> Option<u64> {
    match Length::for_byte(len_byte) {
        Length::U8(b) => Some(u64::from(b)),
        Length::U16 => {
            let raw = input.get(2..4)?;
            Some(u64::from(u16::from_be_bytes([raw[0], raw[1]])))
        },
        Length::U64 => {
            let raw = input.get(2..10)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            Some(u64::from_be_bytes(buf))
        },
    }
}

/// The WebSocket Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Initializes a new frame
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Frame { header, payload }
    }

    /// Create a new data frame.
    #[inline]
    pub fn message(data: impl Into<Bytes>, opcode: Data, fin: bool) -> Frame {
        Frame {
            header: FrameHeader { fin, opcode: OpCode::Data(opcode), ..Default::default() },
            payload: data.into(),
        }
    }

    /// Create a new control frame.
    #[inline]
    pub fn control(data: impl Into<Bytes>, opcode: Control) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(opcode), ..Default::default() },
            payload: data.into(),
        }
    }

    /// Parse one complete frame from the front of `input`.
    ///
    /// Tri-state: a frame plus the number of bytes it occupied, `Ok(None)` when the
    /// frame is still incomplete (not an error, wait for more data), or the violation.
    /// A masked payload is unmasked; the header keeps the key it arrived with.
    pub fn parse(input: &[u8], role: Role) -> Result<Option<(Frame, usize)>, ProtocolError> {
        let Some((header, length, header_len)) = FrameHeader::parse(input, role)? else {
            return Ok(None);
        };

        // `parse` guarantees the length fits in usize.
        let length = length as usize;
        let Some(end) = header_len.checked_add(length) else {
            return Err(ProtocolError::FrameTooLarge(length as u64));
        };
        let Some(raw) = input.get(header_len..end) else {
            return Ok(None);
        };

        let mut payload = raw.to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Some((Frame { header, payload: payload.into() }, end)))
    }

    /// Get the length of the frame.
    /// This is the length of the header + the length of the payload.
    #[inline]
    pub fn len(&self) -> usize {
        let length = self.payload.len();
        self.header.len(length as u64) + length
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the frame's header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Get a mutable reference to the frame's header.
    #[inline]
    pub fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    /// Get a reference to the frame's payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, e.g. with its compressed form.
    #[inline]
    pub(crate) fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Test whether the frame is masked.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// Generate a random mask for the frame.
    ///
    /// This just generates a mask, payload is not changed. The actual masking is performed
    /// on `format()`.
    #[inline]
    pub(crate) fn set_random_mask(&mut self) {
        self.header.set_random_mask();
    }

    /// Consume the frame into its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Write the frame to `buf`, masking the payload if the header carries a key.
    pub fn format(self, buf: &mut Vec<u8>) {
        buf.reserve(self.len());
        self.header.format(self.payload.len() as u64, buf);

        let start = buf.len();
        buf.extend_from_slice(&self.payload);

        if let Some(mask) = self.header.mask {
            apply_mask(&mut buf[start..], mask);
        }
    }

    /// Serialize into a fresh byte vector.
    pub fn serialize(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.format(&mut out);
        out
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<FRAME> final: {}, reserved: {} {} {}, opcode: {}, length: {}, payload-length: {}",
            self.header.fin,
            self.header.rsv1,
            self.header.rsv2,
            self.header.rsv3,
            self.header.opcode,
            self.len(),
            self.payload.len(),
        )
    }
}

enum Length {
    U8(u8),
    U16,
    U64,
}

impl Length {
    #[inline]
    fn for_len(len: u64) -> Self {
        if len < 126 {
            Length::U8(len as u8)
        } else if len < 65536 {
            Length::U16
        } else {
            Length::U64
        }
    }

    #[inline]
    fn additional(&self) -> usize {
        match *self {
            Self::U8(_) => 0,
            Self::U16 => 2,
            Self::U64 => 8,
        }
    }

    #[inline]
    fn len_byte(&self) -> u8 {
        match *self {
            Self::U8(b) => b,
            Self::U16 => 126,
            Self::U64 => 127,
        }
    }

    #[inline]
    fn for_byte(byte: u8) -> Self {
        match byte & 0x7F {
            126 => Length::U16,
            127 => Length::U64,
            b => Length::U8(b),
        }
    }
}
