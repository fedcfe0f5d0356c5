//! Driving a channel over a `Read + Write` stream.
//!
//! [`StreamTransport`] buffers whatever the channel sends and
//! [`Channel::pump_io`] moves bytes between it and the stream, reporting
//! progress back to the channel. Streams may be blocking or non-blocking;
//! `WouldBlock` only ends the current round.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::{self, TcpStream},
    task::Poll,
};

use log::{debug, trace};
use url::Url;

use crate::{
    channel::{
        client::{Blob, BlobReader, Transport},
        Channel,
    },
    error::BlobError,
    util::NonBlockingResult,
};

const READ_CHUNK: usize = 4096;

/// Half-closing a stream once everything has been written.
pub trait Shutdown {
    /// Shuts down the write half.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl Shutdown for TcpStream {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(net::Shutdown::Write)
    }
}

/// A [`Transport`] over a connected stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    out: Vec<u8>,
    open_pending: bool,
    close_after_flush: bool,
    shut_down: bool,
    disconnect_requested: bool,
    finished: bool,
}

impl<S> StreamTransport<S> {
    /// Wraps an already connected stream.
    pub fn new(stream: S) -> Self {
        StreamTransport {
            stream,
            out: Vec::new(),
            open_pending: false,
            close_after_flush: false,
            shut_down: false,
            disconnect_requested: false,
            finished: false,
        }
    }

    /// The stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// The stream, mutably.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes waiting to be written.
    pub fn pending(&self) -> usize {
        self.out.len()
    }

    /// Whether the transport is gone.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<S> Transport for StreamTransport<S> {
    fn connect(&mut self, url: &Url) -> bool {
        debug!("Using the provided stream for {url}");
        self.open_pending = true;
        true
    }

    fn send(&mut self, data: &[u8]) -> bool {
        if self.finished || self.disconnect_requested || self.close_after_flush {
            return false;
        }
        self.out.extend_from_slice(data);
        true
    }

    fn close(&mut self) {
        self.close_after_flush = true;
    }

    fn disconnect(&mut self) {
        self.disconnect_requested = true;
    }
}

impl<S: Read + Write + Shutdown> StreamTransport<S> {
    /// Writes as much as the stream takes. Returns the number of bytes written.
    fn flush_out(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while written < self.out.len() {
            match self.stream.write(&self.out[written..]).no_block()? {
                Some(0) => return Err(io::ErrorKind::WriteZero.into()),
                Some(n) => written += n,
                None => break,
            }
        }
        self.out.drain(..written);
        if written > 0 {
            self.stream.flush().no_block()?;
        }

        if self.out.is_empty() && self.close_after_flush && !self.shut_down {
            debug!("Everything written, shutting down the write half");
            self.shut_down = true;
            self.stream.shutdown_write()?;
        }
        Ok(written)
    }
}

impl<S: Read + Write + Shutdown, B: BlobReader> Channel<StreamTransport<S>, B> {
    /// Runs one round of IO: write what is pending, then read what is available.
    ///
    /// Returns `false` once the transport is closed and the channel was told so.
    pub fn pump_io(&mut self) -> bool {
        if self.transport().is_finished() {
            return false;
        }
        if std::mem::take(&mut self.transport_mut().open_pending) {
            self.did_open_stream();
        }
        if self.finish_if_disconnected() {
            return false;
        }

        match self.transport_mut().flush_out() {
            Ok(0) => (),
            Ok(written) => {
                trace!("Wrote {written} bytes");
                self.did_consume(written);
            },
            Err(e) => self.did_fail_stream(&e.to_string()),
        }
        if self.finish_if_disconnected() {
            return false;
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.transport_mut().stream.read(&mut chunk).no_block() {
            Ok(Some(0)) => {
                debug!("Stream reached end of file");
                self.transport_mut().finished = true;
                self.did_close_stream();
                return false;
            },
            Ok(Some(n)) => self.did_receive_data(&chunk[..n]),
            Ok(None) => (),
            Err(e) => self.did_fail_stream(&e.to_string()),
        }

        !self.finish_if_disconnected()
    }

    fn finish_if_disconnected(&mut self) -> bool {
        let transport = self.transport_mut();
        if !transport.disconnect_requested {
            return false;
        }
        transport.finished = true;
        transport.out.clear();
        self.did_close_stream();
        true
    }
}

/// An in-memory [`BlobReader`].
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: HashMap<String, Vec<u8>>,
}

impl BlobRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` and returns a blob referring to it.
    pub fn register(&mut self, data: Vec<u8>, content_type: &str) -> Blob {
        let uuid = format!("{:032x}", rand::random::<u128>());
        let blob = Blob { uuid: uuid.clone(), content_type: content_type.to_owned(), size: data.len() as u64 };
        self.blobs.insert(uuid, data);
        blob
    }

    /// Forgets a blob.
    pub fn unregister(&mut self, blob: &Blob) {
        self.blobs.remove(&blob.uuid);
    }
}

impl BlobReader for BlobRegistry {
    fn start(&mut self, blob: &Blob) -> Poll<Result<Vec<u8>, BlobError>> {
        Poll::Ready(self.blobs.get(&blob.uuid).cloned().ok_or(BlobError::NotFound))
    }

    fn cancel(&mut self) {}
}
