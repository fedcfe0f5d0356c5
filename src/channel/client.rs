//! The interfaces around a channel: its consumer, its transport and its blob source.

use std::{task::Poll, time::Instant};

use url::Url;

use crate::error::BlobError;

/// Whether both Close frames were exchanged before the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingHandshakeStatus {
    /// The peer's Close frame was received.
    Complete,
    /// The transport went away first.
    Incomplete,
}

/// Outcome of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Queued for transmission.
    Success,
    /// The channel no longer accepts messages.
    Fail,
    /// The message itself is unacceptable, e.g. text that is not UTF-8.
    InvalidMessage,
}

/// A reference to binary data held elsewhere and loaded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Identifier understood by the [`BlobReader`].
    pub uuid: String,
    /// MIME type, informational only.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
}

/// Receives the notifications of a channel.
pub trait ChannelClient {
    /// The opening handshake succeeded.
    fn did_connect(&mut self, subprotocol: &str, extensions: &str);
    /// A complete text message arrived.
    fn did_receive_text_message(&mut self, message: String);
    /// A complete binary message arrived.
    fn did_receive_binary_message(&mut self, data: Vec<u8>);
    /// The connection failed. Reported at most once.
    fn did_receive_message_error(&mut self);
    /// `consumed` bytes of previously sent messages left the local buffers.
    fn did_consume_buffered_amount(&mut self, consumed: u64);
    /// A Close frame was queued, by either side.
    fn did_start_closing_handshake(&mut self);
    /// The terminal notification. Reported at most once, never after `disconnect`.
    fn did_close(&mut self, status: ClosingHandshakeStatus, code: u16, reason: &str);
}

/// A notification waiting to be delivered, see [`WebSocketChannel::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// See [`ChannelClient::did_connect`].
    Connected {
        /// Selected subprotocol.
        protocol: String,
        /// Accepted extensions.
        extensions: String,
    },
    /// See [`ChannelClient::did_receive_text_message`].
    Text(String),
    /// See [`ChannelClient::did_receive_binary_message`].
    Binary(Vec<u8>),
    /// See [`ChannelClient::did_receive_message_error`].
    MessageError,
    /// See [`ChannelClient::did_consume_buffered_amount`].
    ConsumedBufferedAmount(u64),
    /// See [`ChannelClient::did_start_closing_handshake`].
    StartedClosingHandshake,
    /// See [`ChannelClient::did_close`].
    Closed {
        /// Whether the closing handshake completed.
        status: ClosingHandshakeStatus,
        /// Close code, 1005 if the peer sent none and 1006 if there was no Close frame.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl ChannelEvent {
    /// Hands the event to `client`.
    pub fn dispatch<C: ChannelClient + ?Sized>(self, client: &mut C) {
        match self {
            ChannelEvent::Connected { protocol, extensions } => client.did_connect(&protocol, &extensions),
            ChannelEvent::Text(message) => client.did_receive_text_message(message),
            ChannelEvent::Binary(data) => client.did_receive_binary_message(data),
            ChannelEvent::MessageError => client.did_receive_message_error(),
            ChannelEvent::ConsumedBufferedAmount(consumed) => client.did_consume_buffered_amount(consumed),
            ChannelEvent::StartedClosingHandshake => client.did_start_closing_handshake(),
            ChannelEvent::Closed { status, code, reason } => client.did_close(status, code, &reason),
        }
    }
}

/// A byte-stream transport.
///
/// Requests flow in through this trait; the transport's owner reports progress
/// back through the channel's `did_*` methods.
pub trait Transport {
    /// Starts connecting; report success with `did_open_stream`. `false` if refused outright.
    fn connect(&mut self, url: &Url) -> bool;
    /// Queues bytes for writing; report progress with `did_consume`.
    fn send(&mut self, data: &[u8]) -> bool;
    /// Closes after everything queued so far is written.
    fn close(&mut self);
    /// Drops the connection now; report with `did_close_stream`.
    fn disconnect(&mut self);
}

/// Loads blob contents for outgoing messages.
pub trait BlobReader {
    /// Starts loading. A pending load is completed through the channel's
    /// `did_finish_loading_blob`.
    fn start(&mut self, blob: &Blob) -> Poll<Result<Vec<u8>, BlobError>>;
    /// Abandons the pending load.
    fn cancel(&mut self);
}

/// The operations a consumer performs on a channel.
pub trait WebSocketChannel {
    /// Starts connecting to `url`, offering the comma separated `protocol` list.
    fn connect(&mut self, url: &Url, protocol: &str) -> bool;

    /// Queues a text message.
    fn send_text(&mut self, message: &str) -> SendResult;

    /// Queues text given as raw bytes, rejecting invalid UTF-8.
    fn send_text_bytes(&mut self, message: &[u8]) -> SendResult {
        match std::str::from_utf8(message) {
            Ok(text) => self.send_text(text),
            Err(_) => SendResult::InvalidMessage,
        }
    }

    /// Queues `length` bytes of `data` starting at `offset` as a binary message.
    fn send_binary(&mut self, data: &[u8], offset: usize, length: usize) -> SendResult;

    /// Queues a blob-backed binary message.
    fn send_blob(&mut self, blob: Blob) -> SendResult;

    /// Starts the closing handshake. `code` is `None` for a Close frame without payload.
    fn close(&mut self, code: Option<u16>, reason: &str);

    /// Fails the connection.
    fn fail(&mut self, reason: &str);

    /// Tears down without any further notification.
    fn disconnect(&mut self);

    /// Stops delivering notifications.
    fn suspend(&mut self);

    /// Delivers notifications again, starting with anything held back.
    fn resume(&mut self);

    /// The next pending notification.
    fn poll_event(&mut self) -> Option<ChannelEvent>;

    /// The earliest deadline the channel is waiting for.
    fn next_timeout(&self) -> Option<Instant>;

    /// Reports the current time.
    fn handle_timeout(&mut self, now: Instant);
}
