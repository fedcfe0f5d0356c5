//! The consumer-facing socket.
//!
//! [`WebSocket`] validates arguments, keeps the ready state and the buffered
//! amount, and turns channel notifications into application [`Event`]s.

mod flow;
mod url;

use std::{collections::VecDeque, time::Instant};

use log::{debug, warn};

pub use self::{
    flow::{framing_overhead, BufferedAmount},
    url::{join_protocols, parse_url, ConnectPolicy},
};
use crate::{
    channel::{
        client::{Blob, ChannelClient, ClosingHandshakeStatus, SendResult, WebSocketChannel},
        close::MAX_REASON_BYTES,
    },
    error::ApiError,
    protocol::{frame::coding::CloseCode, Message},
    timer::earliest,
};

/// The ready state of a [`WebSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The opening handshake is in progress.
    Connecting,
    /// Messages may be sent and received.
    Open,
    /// The closing handshake started.
    Closing,
    /// Terminal.
    Closed,
}

/// An application-level event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection is open.
    Open,
    /// A message arrived.
    Message(Message),
    /// The connection failed.
    Error,
    /// The connection is closed.
    Close {
        /// Whether the connection closed in an orderly way.
        was_clean: bool,
        /// The close code.
        code: u16,
        /// The close reason.
        reason: String,
    },
}

/// A WebSocket on top of channel `C`.
#[derive(Debug)]
pub struct WebSocket<C> {
    channel: C,
    policy: ConnectPolicy,
    state: ReadyState,
    url: Option<::url::Url>,
    protocol: String,
    extensions: String,
    buffered: BufferedAmount,
    events: VecDeque<Event>,
    released: bool,
}

impl<C: WebSocketChannel> WebSocket<C> {
    /// Wraps `channel` with no connect policy.
    pub fn new(channel: C) -> Self {
        Self::with_policy(channel, ConnectPolicy::default())
    }

    /// Wraps `channel`; `connect` enforces `policy`.
    pub fn with_policy(channel: C, policy: ConnectPolicy) -> Self {
        WebSocket {
            channel,
            policy,
            state: ReadyState::Connecting,
            url: None,
            protocol: String::new(),
            extensions: String::new(),
            buffered: BufferedAmount::new(),
            events: VecDeque::new(),
            released: false,
        }
    }

    /// Validates the arguments and starts connecting.
    ///
    /// Any rejection leaves the socket `Closed`.
    pub fn connect(&mut self, url: &str, protocols: &[&str]) -> Result<(), ApiError> {
        if self.url.is_some() || self.state != ReadyState::Connecting {
            return Err(ApiError::InvalidState("The WebSocket is already connecting or connected.".into()));
        }

        let result = self.start_connect(url, protocols);
        if result.is_err() {
            self.state = ReadyState::Closed;
            self.released = true;
        }
        result
    }

    fn start_connect(&mut self, url: &str, protocols: &[&str]) -> Result<(), ApiError> {
        let url = parse_url(url, &self.policy)?;
        let protocol = join_protocols(protocols)?;

        debug!("Connecting to {url} with subprotocols {protocol:?}");
        let refused = !self.channel.connect(&url, &protocol);
        self.url = Some(url);
        if refused {
            return Err(ApiError::Security("The connection was refused.".into()));
        }
        Ok(())
    }

    /// Sends a text message.
    pub fn send_text(&mut self, message: &str) -> Result<(), ApiError> {
        if !self.check_send(message.len() as u64)? {
            return Ok(());
        }
        let result = self.channel.send_text(message);
        self.account(result, message.len() as u64)
    }

    /// Sends a binary message.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), ApiError> {
        if !self.check_send(data.len() as u64)? {
            return Ok(());
        }
        let result = self.channel.send_binary(data, 0, data.len());
        self.account(result, data.len() as u64)
    }

    /// Sends a blob-backed binary message.
    pub fn send_blob(&mut self, blob: Blob) -> Result<(), ApiError> {
        let size = blob.size;
        if !self.check_send(size)? {
            return Ok(());
        }
        let result = self.channel.send_blob(blob);
        self.account(result, size)
    }

    /// `Ok(true)` if the message should go to the channel.
    fn check_send(&mut self, len: u64) -> Result<bool, ApiError> {
        match self.state {
            ReadyState::Connecting => Err(ApiError::InvalidState("Still in CONNECTING state.".into())),
            ReadyState::Open => Ok(true),
            ReadyState::Closing | ReadyState::Closed => {
                self.buffered.add_after_close(len);
                warn!("WebSocket is already in CLOSING or CLOSED state.");
                Ok(false)
            },
        }
    }

    fn account(&mut self, result: SendResult, len: u64) -> Result<(), ApiError> {
        match result {
            SendResult::Success => {
                self.buffered.add(len);
                Ok(())
            },
            SendResult::Fail => {
                self.buffered.add_after_close(len);
                Ok(())
            },
            SendResult::InvalidMessage => Err(ApiError::Syntax("The message is invalid.".into())),
        }
    }

    /// Starts the closing handshake.
    ///
    /// `code` must be 1000 or within 3000..=4999 and `reason` at most 123 bytes.
    pub fn close(&mut self, code: Option<u16>, reason: &str) -> Result<(), ApiError> {
        if let Some(code) = code {
            if !CloseCode::from(code).is_user_sendable() {
                return Err(ApiError::InvalidAccess(format!(
                    "The code must be either 1000, or between 3000 and 4999. {code} is neither."
                )));
            }
        }
        if reason.len() > MAX_REASON_BYTES {
            return Err(ApiError::Syntax(format!("The message must not be greater than {MAX_REASON_BYTES} bytes.")));
        }

        match self.state {
            ReadyState::Closing | ReadyState::Closed => (),
            ReadyState::Connecting => {
                self.state = ReadyState::Closing;
                self.channel.fail("WebSocket is closed before the connection is established.");
            },
            ReadyState::Open => {
                self.state = ReadyState::Closing;
                self.channel.close(code, reason);
            },
        }
        Ok(())
    }

    /// Tears the connection down without a close event.
    pub fn disconnect(&mut self) {
        if self.released {
            return;
        }
        self.state = ReadyState::Closed;
        self.released = true;
        self.events.clear();
        self.channel.disconnect();
    }

    /// Holds back events until [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        self.channel.suspend();
    }

    /// Delivers held events again.
    pub fn resume(&mut self) {
        self.channel.resume();
    }

    /// The next application event.
    pub fn poll(&mut self) -> Option<Event> {
        while self.events.is_empty() && !self.released {
            let Some(event) = self.channel.poll_event() else {
                break;
            };
            event.dispatch(self);
        }
        self.events.pop_front()
    }

    /// The earliest deadline of the socket or its channel.
    pub fn next_timeout(&self) -> Option<Instant> {
        earliest(self.channel.next_timeout(), self.buffered.next_timeout())
    }

    /// Reports the current time.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.buffered.handle_timeout(now);
        self.channel.handle_timeout(now);
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    /// The URL being connected to.
    pub fn url(&self) -> Option<&::url::Url> {
        self.url.as_ref()
    }

    /// The subprotocol the server selected.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The extensions the server accepted.
    pub fn extensions(&self) -> &str {
        &self.extensions
    }

    /// Bytes sent but not yet written out.
    pub fn buffered_amount(&self) -> u64 {
        self.buffered.get()
    }

    /// The channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The channel, mutably.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: WebSocketChannel> ChannelClient for WebSocket<C> {
    fn did_connect(&mut self, subprotocol: &str, extensions: &str) {
        if self.state != ReadyState::Connecting {
            return;
        }
        self.state = ReadyState::Open;
        self.protocol = subprotocol.to_owned();
        self.extensions = extensions.to_owned();
        self.events.push_back(Event::Open);
    }

    fn did_receive_text_message(&mut self, message: String) {
        if self.state == ReadyState::Open {
            self.events.push_back(Event::Message(Message::Text(message)));
        }
    }

    fn did_receive_binary_message(&mut self, data: Vec<u8>) {
        if self.state == ReadyState::Open {
            self.events.push_back(Event::Message(Message::Binary(data)));
        }
    }

    fn did_receive_message_error(&mut self) {
        self.state = ReadyState::Closed;
        self.events.push_back(Event::Error);
    }

    fn did_consume_buffered_amount(&mut self, consumed: u64) {
        if self.state != ReadyState::Closed {
            self.buffered.consume(consumed, Instant::now());
        }
    }

    fn did_start_closing_handshake(&mut self) {
        self.state = ReadyState::Closing;
    }

    fn did_close(&mut self, status: ClosingHandshakeStatus, code: u16, reason: &str) {
        if self.released {
            return;
        }
        let was_clean = self.state == ReadyState::Closing
            && self.buffered.all_consumed()
            && status == ClosingHandshakeStatus::Complete
            && code != u16::from(CloseCode::Abnormal);

        debug!("WebSocket closed: clean = {was_clean}, code = {code}, reason = {reason:?}");
        self.state = ReadyState::Closed;
        self.buffered.reflect();
        self.released = true;
        self.events.push_back(Event::Close { was_clean, code, reason: reason.to_owned() });
    }
}
