//! Streaming raw-DEFLATE contexts with the per-message sync-flush framing.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::ProtocolError;

/// Every sync flush ends with an empty stored block; RFC 7692 strips it on the wire.
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const CHUNK_SIZE: usize = 4096;

/// Whether the LZ77 window survives from one message to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextTakeOverMode {
    /// Keep the dictionary across messages.
    TakeOverContext,
    /// Start every message from an empty dictionary (`client_no_context_takeover`).
    DoNotTakeOverContext,
}

/// Outgoing compression context.
#[derive(Debug)]
pub struct Deflater {
    compress: Compress,
    mode: ContextTakeOverMode,
    buffer: Vec<u8>,
}

impl Deflater {
    /// `window_bits` is 8-15; zlib cannot produce raw streams with an 8-bit window,
    /// so 8 is raised to 9, whose output a peer limited to 8 bits still accepts.
    pub fn new(window_bits: u8, mode: ContextTakeOverMode, level: u32) -> Self {
        let window_bits = window_bits.clamp(9, 15);
        Self {
            compress: Compress::new_with_window_bits(Compression::new(level), false, window_bits),
            mode,
            buffer: Vec::new(),
        }
    }

    /// Feeds payload bytes without flushing.
    pub fn add_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.run(data, FlushCompress::None)
    }

    /// Sync-flushes and strips the trailer, completing the current message.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        self.run(&[], FlushCompress::Sync)?;
        if self.buffer.ends_with(&DEFLATE_TRAILER) {
            self.buffer.truncate(self.buffer.len() - DEFLATE_TRAILER.len());
            Ok(())
        } else {
            Err(ProtocolError::Compression("Failed to finish compression".into()))
        }
    }

    /// Compressed bytes produced so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops buffered output; between messages also forgets the dictionary
    /// unless context takeover was negotiated.
    pub fn reset(&mut self) {
        self.buffer.clear();
        if self.mode == ContextTakeOverMode::DoNotTakeOverContext {
            self.compress.reset();
        }
    }

    /// Drops buffered output only. Used in the middle of a fragmented message.
    pub fn soft_reset(&mut self) {
        self.buffer.clear();
    }

    fn run(&mut self, mut input: &[u8], flush: FlushCompress) -> Result<(), ProtocolError> {
        loop {
            let old_len = self.buffer.len();
            self.buffer.resize(old_len + CHUNK_SIZE, 0);

            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(input, &mut self.buffer[old_len..], flush)
                .map_err(|e| ProtocolError::Compression(format!("Failed to deflate a frame: {e}")))?;

            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            self.buffer.truncate(old_len + produced);
            input = &input[consumed..];

            // Spare output space left over means zlib has nothing more pending.
            let drained = produced < CHUNK_SIZE;
            if (input.is_empty() && drained) || status == Status::BufError {
                return Ok(());
            }
        }
    }
}

/// Incoming decompression context.
///
/// The window is always 15 bits: that decodes anything a server produces with a
/// smaller window, and keeping the dictionary is harmless when the server resets.
#[derive(Debug)]
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
    limit: Option<usize>,
}

impl Inflater {
    /// `limit` bounds the decompressed size of one message.
    pub fn new(limit: Option<usize>) -> Self {
        Self { decompress: Decompress::new_with_window_bits(false, 15), buffer: Vec::new(), limit }
    }

    /// Feeds compressed bytes of the current message.
    pub fn add_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.run(data, FlushDecompress::None)
    }

    /// Appends the stripped trailer and flushes all output.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        self.run(&DEFLATE_TRAILER, FlushDecompress::Sync)
    }

    /// Decompressed bytes produced so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops buffered output. The dictionary is kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn run(&mut self, mut input: &[u8], flush: FlushDecompress) -> Result<(), ProtocolError> {
        loop {
            let old_len = self.buffer.len();
            self.buffer.resize(old_len + CHUNK_SIZE, 0);

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(input, &mut self.buffer[old_len..], flush)
                .map_err(|e| ProtocolError::Compression(format!("Failed to inflate a frame: {e}")))?;

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            self.buffer.truncate(old_len + produced);
            input = &input[consumed..];

            if let Some(limit) = self.limit {
                if self.buffer.len() > limit {
                    return Err(ProtocolError::Compression(format!(
                        "Decompressed message exceeds {limit} bytes"
                    )));
                }
            }

            match status {
                // The peer ended a stream with BFINAL set; start a fresh one.
                Status::StreamEnd => self.decompress.reset(false),
                Status::BufError if consumed == 0 && produced == 0 => return Ok(()),
                _ => (),
            }

            if input.is_empty() && produced < CHUNK_SIZE {
                return Ok(());
            }
        }
    }
}
