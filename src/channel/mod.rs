//! The channel engine.
//!
//! A [`Channel`] sits between a byte-stream [`Transport`] and a consumer. It
//! performs the opening handshake, turns received bytes into messages, frames
//! and compresses outgoing messages in FIFO order, drives the closing handshake
//! and translates transport write progress into buffered-amount updates.
//!
//! The channel never calls back into its consumer. Notifications are queued and
//! pulled with [`WebSocketChannel::poll_event`]; received data is only processed
//! up to the next notification, so whatever the consumer does in response
//! (close, disconnect, suspend) takes effect before the following frame.

pub mod client;
pub mod close;
pub mod queue;

use std::{collections::VecDeque, task::Poll, time::Instant};

use bytes::Buf;
use log::{debug, trace, warn};
use url::Url;

use self::{
    client::{Blob, BlobReader, ChannelEvent, ClosingHandshakeStatus, SendResult, Transport, WebSocketChannel},
    queue::{BlobLoad, OutgoingQueue, QueueStatus, QueuedFrame, QueuedPayload},
};
use crate::{
    buffer::ReceiveBuffer,
    error::{BlobError, Error, ProtocolError},
    handshake::ClientHandshake,
    protocol::{
        config::WebSocketConfig,
        deflate::PerMessageDeflate,
        extension::{self, ExtensionProcessor},
        frame::{
            coding::{CloseCode, Control, OpCode},
            Frame, Role,
        },
        message::{Message, MessageAssembler},
    },
    timer::Timer,
};

/// Lifecycle of the closing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No Close frame queued yet.
    Idle,
    /// A Close frame was queued.
    Closing,
    /// The transport is gone.
    Closed,
}

/// Bytes handed to the transport that it has not reported as written yet.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    wire_len: usize,
    accounted: u64,
}

/// A client WebSocket channel over transport `T`, loading blobs through `B`.
#[derive(Debug)]
pub struct Channel<T, B> {
    transport: T,
    blob_reader: B,
    config: WebSocketConfig,
    url: Option<Url>,

    handshake: Option<ClientHandshake>,
    connected: bool,
    subprotocol: String,
    extensions: String,

    state: ChannelState,
    buffer: ReceiveBuffer,
    assembler: MessageAssembler,
    deflate: PerMessageDeflate,
    queue: OutgoingQueue,
    in_flight: VecDeque<InFlight>,
    front_written: usize,

    received_closing_handshake: bool,
    close_code: u16,
    close_reason: String,
    closing_timer: Timer,

    suspended: bool,
    discard: bool,
    disconnected: bool,
    closed: bool,
    error_reported: bool,
    close_notified: bool,
    events: VecDeque<ChannelEvent>,
}

impl<T: Transport, B: BlobReader> Channel<T, B> {
    /// Creates a channel with the default configuration.
    pub fn new(transport: T, blob_reader: B) -> Self {
        Self::with_config(transport, blob_reader, WebSocketConfig::default())
    }

    /// Creates a channel.
    pub fn with_config(transport: T, blob_reader: B, config: WebSocketConfig) -> Self {
        Channel {
            buffer: ReceiveBuffer::new(config.max_receive_buffer),
            assembler: MessageAssembler::new(config.max_message_size),
            deflate: PerMessageDeflate::new(&config.compression, config.max_message_size),
            transport,
            blob_reader,
            config,
            url: None,
            handshake: None,
            connected: false,
            subprotocol: String::new(),
            extensions: String::new(),
            state: ChannelState::Idle,
            queue: OutgoingQueue::new(),
            in_flight: VecDeque::new(),
            front_written: 0,
            received_closing_handshake: false,
            close_code: CloseCode::Abnormal.into(),
            close_reason: String::new(),
            closing_timer: Timer::new(),
            suspended: false,
            discard: false,
            disconnected: false,
            closed: false,
            error_reported: false,
            close_notified: false,
            events: VecDeque::new(),
        }
    }

    /// The closing handshake state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The URL passed to `connect`.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The subprotocol the server selected.
    pub fn subprotocol(&self) -> &str {
        &self.subprotocol
    }

    /// The extensions the server accepted.
    pub fn extensions(&self) -> &str {
        &self.extensions
    }

    /// Whether the opening handshake completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The blob reader, mutably.
    pub fn blob_reader_mut(&mut self) -> &mut B {
        &mut self.blob_reader
    }

    fn client_attached(&self) -> bool {
        !self.disconnected && !self.close_notified
    }

    fn notify(&mut self, event: ChannelEvent) {
        if self.client_attached() {
            self.events.push_back(event);
        }
    }

    /// The transport connected; sends the upgrade request.
    pub fn did_open_stream(&mut self) {
        if !self.client_attached() || self.closed {
            return;
        }
        let Some(request) = self.handshake.as_ref().map(|hs| hs.request().to_vec()) else {
            return;
        };
        debug!("Transport open, sending opening handshake ({} bytes)", request.len());
        if !self.send_raw(&request, 0) {
            self.fail("Failed to send WebSocket handshake.");
        }
    }

    /// Bytes arrived from the peer.
    pub fn did_receive_data(&mut self, data: &[u8]) {
        trace!("Received {} bytes", data.len());
        if !self.client_attached() || self.discard || self.closed || self.received_closing_handshake {
            return;
        }
        if let Err(e) = self.buffer.append(data) {
            self.discard = true;
            self.fail(&e.to_string());
            return;
        }
        self.process_buffer();
    }

    /// The transport wrote `amount` bytes.
    pub fn did_consume(&mut self, amount: usize) {
        let mut remaining = amount;
        let mut consumed = 0u64;

        while remaining > 0 {
            let Some(front) = self.in_flight.front().copied() else {
                break;
            };
            let step = remaining.min(front.wire_len - self.front_written);
            self.front_written += step;
            remaining -= step;

            if self.front_written == front.wire_len {
                self.in_flight.pop_front();
                self.front_written = 0;
                consumed += front.accounted;
            }
        }

        if consumed > 0 {
            trace!("Consumed {consumed} buffered bytes");
            self.notify(ChannelEvent::ConsumedBufferedAmount(consumed));
        }
    }

    /// The transport is closed. Every close path ends here.
    pub fn did_close_stream(&mut self) {
        if self.closed {
            return;
        }
        if self.handshake.is_some() && self.client_attached() {
            warn!("{}", ProtocolError::IncompleteHandshake);
        }
        debug!("Transport closed");

        self.closed = true;
        self.state = ChannelState::Closed;
        self.closing_timer.stop();
        if self.queue.status() != QueueStatus::Closed {
            self.abort_outgoing_queue();
        }
        self.process_buffer();
    }

    /// The transport reported an error.
    pub fn did_fail_stream(&mut self, reason: &str) {
        warn!("WebSocket network error: {reason}");
        self.discard = true;
        if self.state == ChannelState::Idle && !self.error_reported && self.client_attached() {
            self.error_reported = true;
            self.events.push_back(ChannelEvent::MessageError);
        }
        if !self.closed {
            self.transport.disconnect();
        }
    }

    /// A blob load started by the queue completed.
    pub fn did_finish_loading_blob(&mut self, result: Result<Vec<u8>, BlobError>) {
        if self.queue.blob_load() != &BlobLoad::Started {
            return;
        }
        match result {
            Ok(bytes) => {
                self.queue.set_blob_load(BlobLoad::Finished(bytes));
                self.process_outgoing_queue();
            },
            Err(e) => {
                self.queue.set_blob_load(BlobLoad::Failed);
                self.fail(&format!("Failed to load Blob: error code = {}", e.code()));
            },
        }
    }

    fn process_buffer(&mut self) {
        while self.events.is_empty() && !self.suspended && self.client_attached() {
            if !self.discard && !self.buffer.is_empty() && self.process_one_item() {
                continue;
            }
            if self.closed {
                self.notify_closed();
            }
            break;
        }
    }

    /// Returns `true` if it made progress and more may follow.
    fn process_one_item(&mut self) -> bool {
        // Nothing the peer sends after its Close frame is processed.
        if self.received_closing_handshake {
            self.buffer.clear();
            return false;
        }
        if self.handshake.is_some() {
            return self.process_handshake();
        }
        self.connected && self.process_frame()
    }

    fn process_handshake(&mut self) -> bool {
        let Some(handshake) = self.handshake.as_ref() else {
            return false;
        };
        let response = match handshake.read_response(self.buffer.chunk()) {
            Ok(Some((used, response))) => {
                self.buffer.advance(used);
                response
            },
            Ok(None) => return false,
            Err(e) => {
                self.handshake = None;
                self.fail(&handshake_failure(&e));
                return false;
            },
        };

        let Some(handshake) = self.handshake.take() else {
            return false;
        };
        let verified = if self.config.compression.enabled {
            handshake.verify(response, &mut [&mut self.deflate as &mut dyn ExtensionProcessor])
        } else {
            handshake.verify(response, &mut [])
        };

        match verified {
            Ok(accepted) => {
                debug!(
                    "Opening handshake complete: protocol = {:?}, extensions = {:?}",
                    accepted.protocol, accepted.extensions
                );
                self.connected = true;
                self.subprotocol = accepted.protocol.clone();
                self.extensions = accepted.extensions.clone();
                self.notify(ChannelEvent::Connected {
                    protocol: accepted.protocol,
                    extensions: accepted.extensions,
                });
                self.process_outgoing_queue();
                true
            },
            Err(e) => {
                self.fail(&handshake_failure(&e));
                false
            },
        }
    }

    fn process_frame(&mut self) -> bool {
        let (mut frame, used) = match Frame::parse(self.buffer.chunk(), Role::Client) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return false,
            Err(e) => {
                self.fail(&e.to_string());
                return false;
            },
        };
        self.buffer.advance(used);
        trace!("Received frame: {frame}");

        if let Err(e) = self.deflate.inflate(&mut frame) {
            self.fail(&e.to_string());
            return false;
        }

        let header = frame.header();
        if header.rsv1 || header.rsv2 || header.rsv3 {
            let error = ProtocolError::NonZeroReservedBits {
                rsv1: header.rsv1 as u8,
                rsv2: header.rsv2 as u8,
                rsv3: header.rsv3 as u8,
            };
            self.fail(&error.to_string());
            return false;
        }

        let fin = header.fin;
        match header.opcode {
            OpCode::Data(opcode) => match self.assembler.push(opcode, fin, frame.payload()) {
                Ok(Some(Message::Text(text))) => self.notify(ChannelEvent::Text(text)),
                Ok(Some(Message::Binary(data))) => self.notify(ChannelEvent::Binary(data)),
                Ok(None) => (),
                Err(e) => {
                    self.fail(&e.to_string());
                    return false;
                },
            },
            OpCode::Control(Control::Close) => {
                if !self.process_close_frame(frame.payload()) {
                    return false;
                }
            },
            OpCode::Control(Control::Ping) => {
                // No frame may follow our Close.
                if self.state == ChannelState::Idle {
                    self.queue.push_back(QueuedFrame::control(Control::Pong, frame.payload().to_vec()));
                    self.process_outgoing_queue();
                }
            },
            OpCode::Control(Control::Pong) => (),
            OpCode::Control(Control::Reserved(code)) => {
                self.fail(&ProtocolError::UnknownOpCode(code).to_string());
                return false;
            },
        }

        self.deflate.reset_inflate_buffer();
        true
    }

    fn process_close_frame(&mut self, payload: &[u8]) -> bool {
        match close::decode(payload) {
            Ok((code, reason)) => {
                self.close_code = code;
                self.close_reason = reason;
            },
            Err(e) => {
                self.close_code = CloseCode::Abnormal.into();
                self.fail(&e.to_string());
                return false;
            },
        }
        debug!("Received Close frame: code = {}, reason = {:?}", self.close_code, self.close_reason);

        self.received_closing_handshake = true;
        self.start_closing_handshake(None, "");
        if self.queue.status() == QueueStatus::Open {
            self.queue.set_status(QueueStatus::Closing);
        }
        self.process_outgoing_queue();
        true
    }

    fn start_closing_handshake(&mut self, code: Option<u16>, reason: &str) {
        if self.state != ChannelState::Idle {
            return;
        }
        let payload = match code {
            Some(code) if !self.received_closing_handshake => close::encode(code, reason),
            _ => Vec::new(),
        };
        self.queue.push_back(QueuedFrame::control(Control::Close, payload));
        self.process_outgoing_queue();

        debug!("Closing handshake started");
        self.state = ChannelState::Closing;
        self.notify(ChannelEvent::StartedClosingHandshake);
    }

    fn notify_closed(&mut self) {
        let status = if self.received_closing_handshake {
            ClosingHandshakeStatus::Complete
        } else {
            ClosingHandshakeStatus::Incomplete
        };
        let reason = std::mem::take(&mut self.close_reason);
        debug!("Channel closed: {status:?}, code = {}, reason = {reason:?}", self.close_code);
        self.notify(ChannelEvent::Closed { status, code: self.close_code, reason });
        self.close_notified = true;
    }

    fn enqueue(&mut self, frame: QueuedFrame) -> SendResult {
        if self.queue.status() != QueueStatus::Open || self.closed || self.disconnected {
            return SendResult::Fail;
        }
        self.queue.push_back(frame);
        self.process_outgoing_queue();
        SendResult::Success
    }

    fn process_outgoing_queue(&mut self) {
        if self.queue.status() == QueueStatus::Closed || !self.connected || self.closed {
            return;
        }

        while let Some(entry) = self.queue.pop_front() {
            let opcode = entry.opcode;
            let accounted = entry.accounted;
            let data = match entry.payload {
                QueuedPayload::Text(text) => text.into_bytes(),
                QueuedPayload::Binary(data) => data,
                QueuedPayload::Blob(blob) => match self.load_blob(&blob) {
                    Some(bytes) => bytes,
                    None => {
                        self.queue.push_front(QueuedFrame { opcode, payload: QueuedPayload::Blob(blob), accounted });
                        return;
                    },
                },
            };

            if !self.send_frame(opcode, data, accounted) {
                self.fail("Failed to send WebSocket frame.");
                return;
            }
        }

        if self.queue.status() == QueueStatus::Closing {
            debug!("Outgoing queue drained, closing transport");
            self.queue.set_status(QueueStatus::Closed);
            self.transport.close();
        }
    }

    /// The bytes of the head blob, or `None` while they are not available.
    fn load_blob(&mut self, blob: &Blob) -> Option<Vec<u8>> {
        if let Some(bytes) = self.queue.take_loaded_blob() {
            return Some(bytes);
        }
        if self.queue.blob_load() != &BlobLoad::NotStarted {
            return None;
        }
        match self.blob_reader.start(blob) {
            Poll::Ready(Ok(bytes)) => Some(bytes),
            Poll::Ready(Err(e)) => {
                self.queue.set_blob_load(BlobLoad::Failed);
                self.fail(&format!("Failed to load Blob: error code = {}", e.code()));
                None
            },
            Poll::Pending => {
                self.queue.set_blob_load(BlobLoad::Started);
                None
            },
        }
    }

    fn abort_outgoing_queue(&mut self) {
        self.queue.abort();
        if self.queue.blob_load() == &BlobLoad::Started {
            self.blob_reader.cancel();
            self.queue.set_blob_load(BlobLoad::Failed);
        }
    }

    fn send_frame(&mut self, opcode: OpCode, payload: Vec<u8>, accounted: u64) -> bool {
        let mut frame = match opcode {
            OpCode::Data(data) => Frame::message(payload, data, true),
            OpCode::Control(control) => Frame::control(payload, control),
        };
        frame.set_random_mask();

        if let Err(e) = self.deflate.deflate(&mut frame) {
            self.fail(&e.to_string());
            return false;
        }
        trace!("Sending frame: {frame}");
        let data = frame.serialize();
        self.deflate.reset_deflate_buffer();

        self.send_raw(&data, accounted)
    }

    fn send_raw(&mut self, data: &[u8], accounted: u64) -> bool {
        if !self.transport.send(data) {
            return false;
        }
        self.in_flight.push_back(InFlight { wire_len: data.len(), accounted });
        true
    }
}

fn handshake_failure(e: &Error) -> String {
    match e {
        Error::Http(res) => {
            format!("Error during WebSocket handshake: Unexpected response code: {}", res.status().as_u16())
        },
        e => format!("Error during WebSocket handshake: {e}"),
    }
}

impl<T: Transport, B: BlobReader> WebSocketChannel for Channel<T, B> {
    fn connect(&mut self, url: &Url, protocol: &str) -> bool {
        debug!("Connecting to {url}");
        let offer = if self.config.compression.enabled {
            extension::offer(&[&self.deflate as &dyn ExtensionProcessor])
        } else {
            None
        };

        match ClientHandshake::new(url, protocol, offer.as_deref()) {
            Ok(handshake) => self.handshake = Some(handshake),
            Err(e) => {
                warn!("Cannot build the opening handshake for {url}: {e}");
                return false;
            },
        }
        self.url = Some(url.clone());
        self.transport.connect(url)
    }

    fn send_text(&mut self, message: &str) -> SendResult {
        self.enqueue(QueuedFrame::text(message.to_owned()))
    }

    fn send_binary(&mut self, data: &[u8], offset: usize, length: usize) -> SendResult {
        let Some(slice) = offset.checked_add(length).and_then(|end| data.get(offset..end)) else {
            return SendResult::InvalidMessage;
        };
        self.enqueue(QueuedFrame::binary(slice.to_vec()))
    }

    fn send_blob(&mut self, blob: Blob) -> SendResult {
        self.enqueue(QueuedFrame::blob(blob))
    }

    fn close(&mut self, code: Option<u16>, reason: &str) {
        if self.closed || self.disconnected {
            return;
        }
        debug!("Close requested: code = {code:?}, reason = {reason:?}");
        self.start_closing_handshake(code, reason);
        if !self.closing_timer.is_active() {
            self.closing_timer.start(Instant::now(), self.config.closing_timeout);
        }
    }

    fn fail(&mut self, reason: &str) {
        warn!("WebSocket connection failed: {reason}");
        self.discard = true;
        self.buffer.clear();
        self.deflate.did_fail();
        self.assembler.clear();

        if !self.disconnected {
            if !self.error_reported && self.client_attached() {
                self.error_reported = true;
                self.events.push_back(ChannelEvent::MessageError);
            }
            if !self.closed {
                self.transport.disconnect();
            }
        }
    }

    fn disconnect(&mut self) {
        debug!("Channel disconnected by its owner");
        self.disconnected = true;
        self.events.clear();
        self.closing_timer.stop();
        if !self.closed {
            self.transport.disconnect();
        }
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
    }

    fn poll_event(&mut self) -> Option<ChannelEvent> {
        if self.suspended {
            return None;
        }
        if self.events.is_empty() {
            self.process_buffer();
        }
        self.events.pop_front()
    }

    fn next_timeout(&self) -> Option<Instant> {
        self.closing_timer.deadline()
    }

    fn handle_timeout(&mut self, now: Instant) {
        if self.closing_timer.poll_expired(now) && !self.closed {
            debug!("Closing handshake timed out");
            self.transport.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{handshake::derive_accept_key, protocol::frame::coding::Data};

    #[derive(Debug, Default)]
    struct MockTransport {
        connected_to: Option<String>,
        sent: Vec<Vec<u8>>,
        closes: usize,
        disconnects: usize,
        refuse_sends: bool,
    }

    impl Transport for MockTransport {
        fn connect(&mut self, url: &Url) -> bool {
            self.connected_to = Some(url.to_string());
            true
        }

        fn send(&mut self, data: &[u8]) -> bool {
            if self.refuse_sends {
                return false;
            }
            self.sent.push(data.to_vec());
            true
        }

        fn close(&mut self) {
            self.closes += 1;
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
        }
    }

    #[derive(Debug, Default)]
    struct MockBlobs {
        started: Vec<String>,
        cancelled: usize,
        immediate: Option<Result<Vec<u8>, BlobError>>,
    }

    impl BlobReader for MockBlobs {
        fn start(&mut self, blob: &Blob) -> Poll<Result<Vec<u8>, BlobError>> {
            self.started.push(blob.uuid.clone());
            match self.immediate.take() {
                Some(result) => Poll::Ready(result),
                None => Poll::Pending,
            }
        }

        fn cancel(&mut self) {
            self.cancelled += 1;
        }
    }

    type TestChannel = Channel<MockTransport, MockBlobs>;

    fn request_key(request: &[u8]) -> String {
        let text = String::from_utf8_lossy(request);
        let line = text.lines().find(|l| l.starts_with("Sec-WebSocket-Key: ")).unwrap();
        line["Sec-WebSocket-Key: ".len()..].to_owned()
    }

    fn response_for(channel: &TestChannel, extra: &str) -> Vec<u8> {
        let key = request_key(&channel.transport().sent[0]);
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{extra}\r\n",
            derive_accept_key(key.as_bytes())
        )
        .into_bytes()
    }

    fn channel_with(config: WebSocketConfig) -> TestChannel {
        let mut channel = Channel::with_config(MockTransport::default(), MockBlobs::default(), config);
        assert!(channel.connect(&Url::parse("ws://example.com/").unwrap(), ""));
        channel.did_open_stream();
        channel
    }

    fn open_channel_with(config: WebSocketConfig, extra: &str) -> TestChannel {
        let mut channel = channel_with(config);
        let response = response_for(&channel, extra);
        channel.did_receive_data(&response);
        assert!(matches!(channel.poll_event(), Some(ChannelEvent::Connected { .. })));
        let request_len = channel.transport().sent[0].len();
        channel.did_consume(request_len);
        channel.transport_mut().sent.clear();
        channel
    }

    fn open_channel() -> TestChannel {
        let mut config = WebSocketConfig::default();
        config.compression.enabled = false;
        open_channel_with(config, "")
    }

    fn events(channel: &mut TestChannel) -> Vec<ChannelEvent> {
        std::iter::from_fn(|| channel.poll_event()).collect()
    }

    fn sent_frames(channel: &TestChannel) -> Vec<Frame> {
        channel
            .transport()
            .sent
            .iter()
            .map(|bytes| {
                let (frame, used) = Frame::parse(bytes, Role::Server).unwrap().unwrap();
                assert_eq!(used, bytes.len());
                frame
            })
            .collect()
    }

    fn server_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut frame = match opcode {
            OpCode::Data(data) => Frame::message(payload.to_vec(), data, fin),
            OpCode::Control(control) => Frame::control(payload.to_vec(), control),
        };
        frame.header_mut().fin = fin;
        frame.serialize()
    }

    fn text(fin: bool, payload: &[u8]) -> Vec<u8> {
        server_frame(OpCode::Data(Data::Text), fin, payload)
    }

    fn server_close(payload: &[u8]) -> Vec<u8> {
        server_frame(OpCode::Control(Control::Close), true, payload)
    }

    #[test]
    fn handshake_request_offers_deflate() {
        let channel = channel_with(WebSocketConfig::default());
        let request = String::from_utf8_lossy(&channel.transport().sent[0]).into_owned();
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n"));
        assert_eq!(channel.transport().connected_to.as_deref(), Some("ws://example.com/"));
    }

    #[test]
    fn frames_after_the_response_head_are_processed() {
        let mut config = WebSocketConfig::default();
        config.compression.enabled = false;
        let mut channel = channel_with(config);
        let mut data = response_for(&channel, "");
        data.extend(text(true, b"first"));

        channel.did_receive_data(&data);
        assert_eq!(
            events(&mut channel),
            vec![
                ChannelEvent::Connected { protocol: String::new(), extensions: String::new() },
                ChannelEvent::Text("first".into()),
            ]
        );
    }

    #[test]
    fn negotiates_deflate_and_inflates() {
        let mut channel = open_channel_with(WebSocketConfig::default(), "Sec-WebSocket-Extensions: permessage-deflate\r\n");
        assert_eq!(channel.extensions(), "permessage-deflate");

        let mut frame = text(true, &[0xf2, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00]);
        frame[0] |= 0x40;
        channel.did_receive_data(&frame);
        assert_eq!(events(&mut channel), vec![ChannelEvent::Text("Hello".into())]);

        assert_eq!(channel.send_text("Hello"), SendResult::Success);
        let sent = sent_frames(&channel);
        assert!(sent[0].header().rsv1);
        assert_eq!(sent[0].payload(), &[0xf2, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00]);
    }

    #[test]
    fn stream_closed_during_handshake() {
        let mut channel = channel_with(WebSocketConfig::default());
        channel.did_receive_data(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: webs");
        channel.did_close_stream();
        assert_eq!(
            events(&mut channel),
            vec![ChannelEvent::Closed {
                status: ClosingHandshakeStatus::Incomplete,
                code: 1006,
                reason: String::new()
            }]
        );
    }

    #[test]
    fn handshake_failure_reports_error() {
        let mut channel = channel_with(WebSocketConfig::default());
        channel.did_receive_data(b"HTTP/1.1 403 Forbidden\r\n\r\n");
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
        assert_eq!(channel.transport().disconnects, 1);

        channel.did_close_stream();
        assert_eq!(
            events(&mut channel),
            vec![ChannelEvent::Closed {
                status: ClosingHandshakeStatus::Incomplete,
                code: 1006,
                reason: String::new()
            }]
        );
    }

    #[test]
    fn fragmented_text_is_delivered_once() {
        let mut channel = open_channel();
        let mut data = text(false, b"Hel");
        data.extend(server_frame(OpCode::Data(Data::Continuation), true, b"lo"));
        channel.did_receive_data(&data);
        assert_eq!(events(&mut channel), vec![ChannelEvent::Text("Hello".into())]);
    }

    #[test]
    fn control_frames_interleave_with_fragments() {
        let mut channel = open_channel();
        let mut data = text(false, b"Hel");
        data.extend(server_frame(OpCode::Control(Control::Ping), true, b"p"));
        data.extend(server_frame(OpCode::Data(Data::Continuation), true, b"lo"));
        channel.did_receive_data(&data);
        assert_eq!(events(&mut channel), vec![ChannelEvent::Text("Hello".into())]);

        let sent = sent_frames(&channel);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header().opcode, OpCode::Control(Control::Pong));
        assert_eq!(sent[0].payload(), b"p");
    }

    #[test]
    fn byte_at_a_time() {
        let mut channel = open_channel();
        for byte in text(true, b"slow") {
            channel.did_receive_data(&[byte]);
        }
        assert_eq!(events(&mut channel), vec![ChannelEvent::Text("slow".into())]);
    }

    #[test]
    fn protocol_violation_fails_once_and_discards() {
        let mut channel = open_channel();
        let mut masked = text(true, b"x");
        masked[1] |= 0x80;
        masked.splice(2..2, [0, 0, 0, 0]);
        masked.extend(text(true, b"never"));

        channel.did_receive_data(&masked);
        channel.did_receive_data(&text(true, b"ignored"));
        channel.fail("again");
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
        assert_eq!(channel.transport().disconnects, 2);
    }

    #[test]
    fn reserved_bits_fail() {
        let mut channel = open_channel();
        let mut frame = text(true, b"x");
        frame[0] |= 0x20;
        channel.did_receive_data(&frame);
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
    }

    #[test]
    fn unexpected_continuation_fails() {
        let mut channel = open_channel();
        channel.did_receive_data(&server_frame(OpCode::Data(Data::Continuation), true, b"x"));
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
    }

    #[test]
    fn client_initiated_close() {
        let mut channel = open_channel();
        channel.close(Some(3005), "bye");
        assert_eq!(channel.state(), ChannelState::Closing);
        assert!(channel.next_timeout().is_some());
        assert_eq!(events(&mut channel), vec![ChannelEvent::StartedClosingHandshake]);

        let sent = sent_frames(&channel);
        assert_eq!(sent[0].header().opcode, OpCode::Control(Control::Close));
        assert_eq!(sent[0].payload(), &close::encode(3005, "bye")[..]);
        assert_eq!(channel.send_text("late"), SendResult::Success);

        channel.did_receive_data(&server_close(&close::encode(3005, "bye")));
        assert_eq!(channel.transport().closes, 1);
        assert_eq!(sent_frames(&channel).len(), 2);

        channel.did_close_stream();
        assert_eq!(
            events(&mut channel),
            vec![ChannelEvent::Closed {
                status: ClosingHandshakeStatus::Complete,
                code: 3005,
                reason: "bye".into()
            }]
        );
        assert_eq!(channel.next_timeout(), None);
    }

    #[test]
    fn server_initiated_close_replies_without_payload() {
        let mut channel = open_channel();
        channel.did_receive_data(&server_close(&close::encode(1000, "done")));

        let sent = sent_frames(&channel);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header().opcode, OpCode::Control(Control::Close));
        assert!(sent[0].payload().is_empty());
        assert_eq!(channel.transport().closes, 1);
        assert_eq!(channel.send_text("late"), SendResult::Fail);

        channel.did_close_stream();
        assert_eq!(
            events(&mut channel),
            vec![
                ChannelEvent::StartedClosingHandshake,
                ChannelEvent::Closed {
                    status: ClosingHandshakeStatus::Complete,
                    code: 1000,
                    reason: "done".into()
                },
            ]
        );
    }

    #[test]
    fn frames_after_server_close_are_dropped() {
        let mut channel = open_channel();
        let mut data = server_close(&close::encode(1000, ""));
        data.extend(text(true, b"late"));
        data.extend(server_frame(OpCode::Data(Data::Reserved(3)), true, b""));
        channel.did_receive_data(&data);
        channel.did_receive_data(&text(true, b"later"));

        channel.did_close_stream();
        assert_eq!(
            events(&mut channel),
            vec![
                ChannelEvent::StartedClosingHandshake,
                ChannelEvent::Closed {
                    status: ClosingHandshakeStatus::Complete,
                    code: 1000,
                    reason: String::new()
                },
            ]
        );
        assert_eq!(channel.transport().disconnects, 0);
    }

    #[test]
    fn empty_close_is_no_status() {
        let mut channel = open_channel();
        channel.did_receive_data(&server_close(&[]));
        channel.did_close_stream();
        let last = events(&mut channel).pop();
        assert!(matches!(last, Some(ChannelEvent::Closed { code: 1005, .. })));
    }

    #[test]
    fn broken_close_frames() {
        for payload in [vec![0x03], 1006u16.to_be_bytes().to_vec()] {
            let mut channel = open_channel();
            channel.did_receive_data(&server_close(&payload));
            channel.did_close_stream();
            assert_eq!(
                events(&mut channel),
                vec![
                    ChannelEvent::MessageError,
                    ChannelEvent::Closed {
                        status: ClosingHandshakeStatus::Incomplete,
                        code: 1006,
                        reason: String::new()
                    },
                ]
            );
        }
    }

    #[test]
    fn closing_timeout_disconnects() {
        let mut channel = open_channel();
        channel.close(Some(1000), "");
        let deadline = channel.next_timeout().unwrap();

        channel.handle_timeout(deadline - Duration::from_secs(1));
        assert_eq!(channel.transport().disconnects, 0);
        channel.handle_timeout(deadline);
        assert_eq!(channel.transport().disconnects, 1);

        channel.did_close_stream();
        channel.did_close_stream();
        let closes: Vec<_> =
            events(&mut channel).into_iter().filter(|e| matches!(e, ChannelEvent::Closed { .. })).collect();
        assert_eq!(closes.len(), 1);
    }

    #[test]
    fn disconnect_suppresses_close() {
        let mut channel = open_channel();
        channel.did_receive_data(&text(true, b"pending"));
        channel.disconnect();
        channel.did_close_stream();
        assert_eq!(events(&mut channel), vec![]);
        assert_eq!(channel.transport().disconnects, 1);
    }

    #[test]
    fn suspend_holds_events() {
        let mut channel = open_channel();
        channel.suspend();
        channel.did_receive_data(&text(true, b"a"));
        channel.did_receive_data(&text(true, b"b"));
        channel.did_close_stream();
        assert_eq!(channel.poll_event(), None);

        channel.resume();
        assert_eq!(
            events(&mut channel),
            vec![
                ChannelEvent::Text("a".into()),
                ChannelEvent::Text("b".into()),
                ChannelEvent::Closed {
                    status: ClosingHandshakeStatus::Incomplete,
                    code: 1006,
                    reason: String::new()
                },
            ]
        );
    }

    #[test]
    fn consumption_maps_to_payload_bytes() {
        let mut channel = open_channel();
        channel.send_text("hello");
        channel.send_binary(b"xxabcxx", 2, 3);
        let wire: Vec<usize> = channel.transport().sent.iter().map(Vec::len).collect();
        assert_eq!(wire, vec![11, 9]);

        channel.did_consume(10);
        assert_eq!(channel.poll_event(), None);
        channel.did_consume(1);
        channel.did_consume(9);
        assert_eq!(
            events(&mut channel),
            vec![ChannelEvent::ConsumedBufferedAmount(5), ChannelEvent::ConsumedBufferedAmount(3)]
        );
    }

    #[test]
    fn invalid_binary_range() {
        let mut channel = open_channel();
        assert_eq!(channel.send_binary(b"abc", 2, 2), SendResult::InvalidMessage);
        assert_eq!(channel.send_binary(b"abc", usize::MAX, 2), SendResult::InvalidMessage);
        assert_eq!(channel.send_text_bytes(&[0xff]), SendResult::InvalidMessage);
    }

    #[test]
    fn blob_blocks_queue_until_loaded() {
        let mut channel = open_channel();
        let blob = Blob { uuid: "b1".into(), content_type: String::new(), size: 3 };
        assert_eq!(channel.send_blob(blob), SendResult::Success);
        channel.send_text("after");
        assert!(channel.transport().sent.is_empty());
        assert_eq!(channel.blob_reader_mut().started, vec!["b1".to_owned()]);

        channel.did_finish_loading_blob(Ok(vec![1, 2, 3]));
        let sent = sent_frames(&channel);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload(), &[1, 2, 3]);
        assert_eq!(sent[1].payload(), b"after");
    }

    #[test]
    fn blob_failure_fails_channel() {
        let mut channel = open_channel();
        channel.blob_reader_mut().immediate = Some(Err(BlobError::NotReadable));
        channel.send_blob(Blob { uuid: "b".into(), content_type: String::new(), size: 1 });
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
        assert_eq!(channel.transport().disconnects, 1);
    }

    #[test]
    fn close_during_blob_load_cancels() {
        let mut channel = open_channel();
        channel.send_blob(Blob { uuid: "b".into(), content_type: String::new(), size: 1 });
        channel.did_close_stream();
        assert_eq!(channel.blob_reader_mut().cancelled, 1);
        channel.did_finish_loading_blob(Ok(vec![1]));
        assert!(channel.transport().sent.is_empty());
    }

    #[test]
    fn failed_send_fails_channel() {
        let mut channel = open_channel();
        channel.transport_mut().refuse_sends = true;
        channel.send_text("x");
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
    }

    #[test]
    fn receive_buffer_limit() {
        let mut config = WebSocketConfig::default();
        config.compression.enabled = false;
        config.max_receive_buffer = 256;
        let mut channel = open_channel_with(config, "");
        channel.did_receive_data(&[0x82, 0x7e, 0x01, 0x00]);
        channel.did_receive_data(&[0u8; 300]);
        assert_eq!(events(&mut channel), vec![ChannelEvent::MessageError]);
    }

    #[test]
    fn network_error_after_close_is_not_reported() {
        let mut channel = open_channel();
        channel.close(None, "");
        assert!(sent_frames(&channel)[0].payload().is_empty());
        channel.did_fail_stream("reset");
        assert_eq!(events(&mut channel), vec![ChannelEvent::StartedClosingHandshake]);
        assert_eq!(channel.transport().disconnects, 1);
    }
}
