//! Owning a channel on another thread.
//!
//! [`channel_bridge`] splits a channel into a [`ChannelBridge`], which
//! implements [`WebSocketChannel`] by message passing and can be handed to a
//! consumer on any thread, and a [`BridgePeer`] that stays with the channel and
//! is pumped by the thread owning the transport.
//!
//! [`ChannelBridge::connect`] blocks until the peer answers. A
//! [`BridgeShutdown`] taken from the bridge releases that wait when the
//! consumer's thread is torn down.

use std::{
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender, TryRecvError},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Instant,
};

use log::debug;
use url::Url;

use crate::channel::client::{Blob, ChannelEvent, SendResult, WebSocketChannel};

#[derive(Debug)]
enum Request {
    Connect { url: Url, protocol: String, reply: SyncSender<bool> },
    Text(String),
    Binary(Vec<u8>),
    Blob(Blob),
    Close(Option<u16>, String),
    Fail(String),
    Disconnect,
    Suspend,
    Resume,
}

/// Splits `channel` into its remote handle and the side that drives it.
pub fn channel_bridge<C: WebSocketChannel>(channel: C) -> (ChannelBridge, BridgePeer<C>) {
    let (requests_tx, requests_rx) = mpsc::channel();
    let (events_tx, events_rx) = mpsc::channel();

    let bridge = ChannelBridge {
        requests: requests_tx,
        events: events_rx,
        suspended: false,
        shutdown: BridgeShutdown::default(),
    };
    let peer = BridgePeer { channel, requests: requests_rx, events: events_tx };
    (bridge, peer)
}

#[derive(Debug, Default)]
struct Waiter {
    cancelled: bool,
    reply: Option<SyncSender<bool>>,
}

/// Cancels a bridge's pending and future [`connect`](WebSocketChannel::connect) calls.
#[derive(Debug, Clone, Default)]
pub struct BridgeShutdown {
    waiter: Arc<Mutex<Waiter>>,
}

impl BridgeShutdown {
    /// Wakes a blocked `connect`, which then answers `false`, as do all later ones.
    pub fn shutdown(&self) {
        let mut waiter = self.lock();
        if waiter.cancelled {
            return;
        }
        debug!("Bridge shut down");
        waiter.cancelled = true;
        if let Some(reply) = waiter.reply.take() {
            let _ = reply.try_send(false);
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().cancelled
    }

    fn lock(&self) -> MutexGuard<'_, Waiter> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The consumer's handle on a channel owned elsewhere.
///
/// Sends report [`SendResult::Success`] once the peer has the request. When the
/// remote channel refuses one, the peer reports its size as consumed so the
/// buffered amount still drains.
#[derive(Debug)]
pub struct ChannelBridge {
    requests: Sender<Request>,
    events: Receiver<ChannelEvent>,
    suspended: bool,
    shutdown: BridgeShutdown,
}

impl ChannelBridge {
    /// A handle that can release this bridge from another thread.
    pub fn shutdown_handle(&self) -> BridgeShutdown {
        self.shutdown.clone()
    }

    fn post(&self, request: Request) -> bool {
        self.requests.send(request).is_ok()
    }

    fn post_message(&self, request: Request) -> SendResult {
        if self.post(request) {
            SendResult::Success
        } else {
            SendResult::Fail
        }
    }
}

impl WebSocketChannel for ChannelBridge {
    /// Blocks until the peer answered. A peer that goes away answers `false`,
    /// and so does a [`BridgeShutdown`].
    fn connect(&mut self, url: &Url, protocol: &str) -> bool {
        // Room for both the peer's answer and a shutdown.
        let (reply, answer) = mpsc::sync_channel(2);
        {
            let mut waiter = self.shutdown.lock();
            if waiter.cancelled {
                return false;
            }
            waiter.reply = Some(reply.clone());
        }

        let request = Request::Connect { url: url.clone(), protocol: protocol.to_owned(), reply };
        let accepted = self.post(request) && answer.recv().unwrap_or(false);
        self.shutdown.lock().reply = None;
        if !accepted && self.shutdown.is_shut_down() {
            // The peer may still act on the request.
            self.post(Request::Disconnect);
        }
        accepted
    }

    fn send_text(&mut self, message: &str) -> SendResult {
        self.post_message(Request::Text(message.to_owned()))
    }

    fn send_binary(&mut self, data: &[u8], offset: usize, length: usize) -> SendResult {
        let Some(slice) = offset.checked_add(length).and_then(|end| data.get(offset..end)) else {
            return SendResult::InvalidMessage;
        };
        self.post_message(Request::Binary(slice.to_vec()))
    }

    fn send_blob(&mut self, blob: Blob) -> SendResult {
        self.post_message(Request::Blob(blob))
    }

    fn close(&mut self, code: Option<u16>, reason: &str) {
        self.post(Request::Close(code, reason.to_owned()));
    }

    fn fail(&mut self, reason: &str) {
        self.post(Request::Fail(reason.to_owned()));
    }

    fn disconnect(&mut self) {
        self.post(Request::Disconnect);
        while self.events.try_recv().is_ok() {}
    }

    fn suspend(&mut self) {
        self.suspended = true;
        self.post(Request::Suspend);
    }

    fn resume(&mut self) {
        self.suspended = false;
        self.post(Request::Resume);
    }

    fn poll_event(&mut self) -> Option<ChannelEvent> {
        if self.suspended {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Timers run on the peer's side.
    fn next_timeout(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, _now: Instant) {}
}

/// The side of a bridge that owns the channel.
#[derive(Debug)]
pub struct BridgePeer<C> {
    channel: C,
    requests: Receiver<Request>,
    events: Sender<ChannelEvent>,
}

impl<C: WebSocketChannel> BridgePeer<C> {
    /// Applies pending requests, fires due timers and forwards notifications.
    ///
    /// Returns `false` once the bridge is gone; the channel has been disconnected then.
    pub fn pump(&mut self, now: Instant) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(request) => self.apply(request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Bridge dropped, disconnecting the channel");
                    self.channel.disconnect();
                    return false;
                },
            }
        }

        self.channel.handle_timeout(now);

        while let Some(event) = self.channel.poll_event() {
            if self.events.send(event).is_err() {
                self.channel.disconnect();
                return false;
            }
        }
        true
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Connect { url, protocol, reply } => {
                let accepted = self.channel.connect(&url, &protocol);
                // The bridge may have given up waiting.
                let _ = reply.send(accepted);
            },
            Request::Text(message) => {
                let result = self.channel.send_text(&message);
                self.refused(result, message.len() as u64);
            },
            Request::Binary(data) => {
                let result = self.channel.send_binary(&data, 0, data.len());
                self.refused(result, data.len() as u64);
            },
            Request::Blob(blob) => {
                let size = blob.size;
                let result = self.channel.send_blob(blob);
                self.refused(result, size);
            },
            Request::Close(code, reason) => self.channel.close(code, &reason),
            Request::Fail(reason) => self.channel.fail(&reason),
            Request::Disconnect => self.channel.disconnect(),
            Request::Suspend => self.channel.suspend(),
            Request::Resume => self.channel.resume(),
        }
    }

    /// The bridge already counted a refused message as buffered.
    fn refused(&self, result: SendResult, size: u64) {
        if result != SendResult::Success && size > 0 {
            debug!("Channel refused a message of {size} bytes");
            let _ = self.events.send(ChannelEvent::ConsumedBufferedAmount(size));
        }
    }

    /// The earliest deadline of the channel.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.channel.next_timeout()
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
