//! ws-channel: a client-side WebSocket channel engine.
//!
//! The [`channel::Channel`] speaks RFC 6455 (with RFC 7692 `permessage-deflate`)
//! over any byte-stream [`channel::client::Transport`] without doing IO itself.
//! [`socket::WebSocket`] layers the browser-style consumer API on top of it,
//! [`stream::StreamTransport`] drives a channel over a `Read + Write` stream and
//! [`bridge`] lets a channel be owned by another thread.
#![allow(clippy::result_large_err)]

use std::time::Duration;

pub mod bridge;
pub mod channel;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod socket;
pub mod stream;
pub mod timer;
pub mod util;

mod buffer;

pub use crate::{
    channel::{
        client::{ChannelClient, ChannelEvent, SendResult, WebSocketChannel},
        Channel,
    },
    error::{Error, Result},
    protocol::{Message, WebSocketConfig},
    socket::WebSocket,
};

/// Default upper bound for one reassembled message.
pub const MAX_ALLOWED_LEN: usize = 64 << 20;
/// Maximum payload of a control frame.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;
/// How long a started closing handshake may take before the transport is dropped.
pub const CLOSING_TIMEOUT: Duration = Duration::from_secs(2 * 2 * 60);
