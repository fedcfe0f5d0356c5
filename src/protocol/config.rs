//! Channel configuration

use std::time::Duration;

use crate::{CLOSING_TIMEOUT, MAX_ALLOWED_LEN};

/// The configuration for a WebSocket channel.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// The maximum size of an incoming message after reassembly and decompression.
    /// `None` means no limit. The default value is 64 MiB.
    pub max_message_size: Option<usize>,
    /// The maximum number of received bytes the channel holds before they are
    /// processed. Exceeding it fails the connection. The default value is 128 MiB.
    pub max_receive_buffer: usize,
    /// How long the closing handshake may take before the transport is dropped.
    /// Defaults to twice the maximum TCP segment lifetime, 4 minutes.
    pub closing_timeout: Duration,
    /// Per-message deflate settings.
    pub compression: WebSocketCompressionConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: Some(MAX_ALLOWED_LEN),
            max_receive_buffer: 2 * MAX_ALLOWED_LEN,
            closing_timeout: CLOSING_TIMEOUT,
            compression: WebSocketCompressionConfig::default(),
        }
    }
}

/// Whether and how `permessage-deflate` is offered.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketCompressionConfig {
    /// Offer the extension in the opening handshake.
    pub enabled: bool,
    /// zlib compression level, 0-9.
    pub level: u32,
}

impl Default for WebSocketCompressionConfig {
    fn default() -> Self {
        Self { enabled: true, level: 6 }
    }
}
