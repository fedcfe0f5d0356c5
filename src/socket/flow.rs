//! Buffered-amount accounting.
//!
//! Consumption reported by the channel is staged and only reflected in the
//! visible amount by a zero-delay task, so a consumer reading the amount twice
//! within the same turn sees the same value.

use std::time::{Duration, Instant};

use crate::timer::Timer;

/// Bytes a client frame adds around a payload of `len` bytes.
pub fn framing_overhead(len: u64) -> u64 {
    let extended = match len {
        0..=125 => 0,
        126..=0xffff => 2,
        _ => 8,
    };
    2 + 4 + extended
}

/// The counter behind `WebSocket::buffered_amount`.
#[derive(Debug, Default)]
pub struct BufferedAmount {
    buffered: u64,
    consumed: u64,
    after_close: u64,
    reflect: Timer,
}

impl BufferedAmount {
    /// A zero counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible amount.
    pub fn get(&self) -> u64 {
        self.buffered.saturating_add(self.after_close)
    }

    /// Counts a message handed to the channel.
    pub fn add(&mut self, amount: u64) {
        self.buffered = self.buffered.saturating_add(amount);
    }

    /// Counts a message dropped because the socket is closing, with its framing.
    pub fn add_after_close(&mut self, payload_len: u64) {
        self.after_close = self.after_close.saturating_add(payload_len.saturating_add(framing_overhead(payload_len)));
    }

    /// Stages consumption reported by the channel.
    pub fn consume(&mut self, amount: u64, now: Instant) {
        self.consumed = self.consumed.saturating_add(amount).min(self.buffered);
        if !self.reflect.is_active() {
            self.reflect.start(now, Duration::ZERO);
        }
    }

    /// Whether every counted byte has been reported as consumed.
    pub fn all_consumed(&self) -> bool {
        self.buffered == self.consumed
    }

    /// Applies the staged consumption.
    pub fn reflect(&mut self) {
        self.buffered -= self.consumed;
        self.consumed = 0;
        self.reflect.stop();
    }

    /// When the staged consumption is due.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.reflect.deadline()
    }

    /// Applies the staged consumption once due.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.reflect.poll_expired(now) {
            self.reflect();
        }
    }
}
