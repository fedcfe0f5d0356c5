//! Close frame payloads: a big-endian status code followed by a UTF-8 reason.

use crate::{error::ProtocolError, protocol::frame::coding::CloseCode};

/// Longest reason that fits a control frame next to the status code.
pub const MAX_REASON_BYTES: usize = 123;

/// Builds a Close payload.
pub fn encode(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Reads a received Close payload.
///
/// An empty payload means "no status received" (1005). One byte is malformed,
/// and codes that only describe local conditions must never arrive.
pub fn decode(payload: &[u8]) -> Result<(u16, String), ProtocolError> {
    match payload {
        [] => Ok((CloseCode::NoStatusReceived.into(), String::new())),
        [_] => Err(ProtocolError::InvalidCloseFrame),
        [high, low, reason @ ..] => {
            let code = u16::from_be_bytes([*high, *low]);
            if CloseCode::from(code).is_reserved() {
                return Err(ProtocolError::ReservedCloseCode(code));
            }
            let reason = std::str::from_utf8(reason).map_err(|_| ProtocolError::InvalidCloseReason)?;
            Ok((code, reason.to_owned()))
        },
    }
}
