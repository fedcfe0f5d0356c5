//! Opening handshake module

pub mod client;
pub mod headers;

use base64::Engine;
use sha1::{Digest, Sha1};

pub use self::client::{Accepted, ClientHandshake, Response};

/// Derives the `Sec-WebSocket-Accept` header value from a `Sec-WebSocket-Key` request header.
pub fn derive_accept_key(req_key: &[u8]) -> String {
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    let mut hasher = Sha1::default();
    hasher.update(req_key);
    hasher.update(WS_GUID);

    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Generates a random key for the `Sec-WebSocket-Key` header
pub fn generate_key() -> String {
    let r: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(r)
}
