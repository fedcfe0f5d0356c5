//! The `permessage-deflate` extension (RFC 7692), client side.

mod stream;

pub use self::stream::{ContextTakeOverMode, Deflater, Inflater};

use log::debug;

use crate::{
    error::{NegotiationError, ProtocolError},
    protocol::{
        config::WebSocketCompressionConfig,
        extension::{ExtensionParams, ExtensionProcessor},
        frame::{
            coding::{Data, OpCode},
            Frame,
        },
    },
};

/// The extension token.
pub const EXTENSION_NAME: &str = "permessage-deflate";

/// Per-connection compression state.
///
/// Disabled until a response negotiates it; while disabled every operation is a
/// no-op, so the channel calls `deflate`/`inflate` unconditionally.
#[derive(Debug)]
pub struct PerMessageDeflate {
    level: u32,
    inflate_limit: Option<usize>,
    response_processed: bool,
    enabled: bool,
    deflate_ongoing: bool,
    inflate_ongoing: bool,
    deflater: Option<Deflater>,
    inflater: Option<Inflater>,
}

impl PerMessageDeflate {
    /// Creates a disabled context. `inflate_limit` bounds one decompressed message.
    pub fn new(config: &WebSocketCompressionConfig, inflate_limit: Option<usize>) -> Self {
        Self {
            level: config.level,
            inflate_limit,
            response_processed: false,
            enabled: false,
            deflate_ongoing: false,
            inflate_ongoing: false,
            deflater: None,
            inflater: None,
        }
    }

    /// Whether negotiation succeeded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns compression on with the negotiated parameters.
    pub fn enable(&mut self, window_bits: u8, mode: ContextTakeOverMode) {
        debug!("permessage-deflate enabled: client_max_window_bits = {window_bits}, mode = {mode:?}");
        self.enabled = true;
        self.deflater = Some(Deflater::new(window_bits, mode, self.level));
        self.inflater = Some(Inflater::new(self.inflate_limit));
    }

    /// Compresses an outgoing frame in place.
    pub fn deflate(&mut self, frame: &mut Frame) -> Result<(), ProtocolError> {
        let Some(deflater) = self.deflater.as_mut().filter(|_| self.enabled) else {
            return Ok(());
        };
        if frame.header().rsv1 {
            return Err(ProtocolError::Compression(
                "Some extension already uses the compress bit.".into(),
            ));
        }

        let opcode = frame.header().opcode;
        if opcode.is_control() {
            return Ok(());
        }
        let fin = frame.header().fin;
        // Not worth it: the deflate block would be at least as long.
        if matches!(opcode, OpCode::Data(Data::Text | Data::Binary)) && fin && frame.payload().len() <= 2 {
            return Ok(());
        }

        deflater.add_bytes(frame.payload())?;
        if fin {
            deflater.finish()?;
        }

        let compressed = deflater.data().to_vec();
        frame.header_mut().rsv1 = !self.deflate_ongoing;
        frame.set_payload(compressed);
        self.deflate_ongoing = !fin;
        Ok(())
    }

    /// Decompresses an incoming frame in place and clears its compress bit.
    pub fn inflate(&mut self, frame: &mut Frame) -> Result<(), ProtocolError> {
        let Some(inflater) = self.inflater.as_mut().filter(|_| self.enabled) else {
            return Ok(());
        };

        let compressed = frame.header().rsv1;
        if frame.header().opcode.is_control() {
            return if compressed {
                Err(ProtocolError::Compression("Received unexpected compressed frame".into()))
            } else {
                Ok(())
            };
        }

        if compressed {
            if self.inflate_ongoing {
                return Err(ProtocolError::Compression("Received unexpected compressed frame".into()));
            }
            self.inflate_ongoing = true;
        }
        if !self.inflate_ongoing {
            return Ok(());
        }

        let fin = frame.header().fin;
        inflater.add_bytes(frame.payload())?;
        if fin {
            inflater.finish()?;
        }

        let inflated = inflater.data().to_vec();
        frame.header_mut().rsv1 = false;
        frame.set_payload(inflated);
        self.inflate_ongoing = !fin;
        Ok(())
    }

    /// Called after every sent frame.
    pub fn reset_deflate_buffer(&mut self) {
        if let Some(deflater) = self.deflater.as_mut() {
            if self.deflate_ongoing {
                deflater.soft_reset();
            } else {
                deflater.reset();
            }
        }
    }

    /// Called after every received frame.
    pub fn reset_inflate_buffer(&mut self) {
        if let Some(inflater) = self.inflater.as_mut() {
            inflater.reset();
        }
    }

    /// The connection failed: drop buffers and stop compressing.
    pub fn did_fail(&mut self) {
        self.reset_deflate_buffer();
        self.reset_inflate_buffer();
        self.enabled = false;
        self.deflate_ongoing = false;
        self.inflate_ongoing = false;
    }
}

impl ExtensionProcessor for PerMessageDeflate {
    fn extension_token(&self) -> &str {
        EXTENSION_NAME
    }

    fn handshake_string(&self) -> String {
        format!("{EXTENSION_NAME}; client_max_window_bits")
    }

    fn process_response(&mut self, params: &ExtensionParams) -> Result<(), NegotiationError> {
        if self.response_processed {
            return Err(NegotiationError::DuplicateResponse(EXTENSION_NAME.into()));
        }
        self.response_processed = true;

        let mut mode = ContextTakeOverMode::TakeOverContext;
        let mut window_bits = 15;
        let mut known = 0;

        if let Some(value) = params.get("client_no_context_takeover") {
            if value.is_some() {
                return Err(NegotiationError::InvalidParameter("client_no_context_takeover"));
            }
            mode = ContextTakeOverMode::DoNotTakeOverContext;
            known += 1;
        }

        if let Some(value) = params.get("client_max_window_bits") {
            window_bits = parse_window_bits(value, "client_max_window_bits")?;
            known += 1;
        }

        // The server side of the stream is never constrained by our offer, so
        // these only need to be well formed.
        if let Some(value) = params.get("server_no_context_takeover") {
            if value.is_some() {
                return Err(NegotiationError::InvalidParameter("server_no_context_takeover"));
            }
            known += 1;
        }

        if let Some(value) = params.get("server_max_window_bits") {
            parse_window_bits(value, "server_max_window_bits")?;
            known += 1;
        }

        if known < params.len() {
            return Err(NegotiationError::UnexpectedParameter);
        }

        self.enable(window_bits, mode);
        Ok(())
    }
}

/// 8-15 written as plain decimal: no sign, no leading zero.
fn parse_window_bits(value: Option<&str>, name: &'static str) -> Result<u8, NegotiationError> {
    let value = value.ok_or(NegotiationError::MissingValue(name))?;
    if value.starts_with(['+', '-', '0']) {
        return Err(NegotiationError::InvalidParameter(name));
    }
    match value.parse::<u8>() {
        Ok(bits @ 8..=15) => Ok(bits),
        _ => Err(NegotiationError::InvalidParameter(name)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::{
        extension::{negotiate, parse},
        frame::coding::Control,
    };

    fn negotiated(header: &str) -> Result<PerMessageDeflate, NegotiationError> {
        let mut pmd = PerMessageDeflate::new(&WebSocketCompressionConfig::default(), None);
        negotiate(Some(header), &mut [&mut pmd])?;
        Ok(pmd)
    }

    fn params(header: &str) -> ExtensionParams {
        parse(header).unwrap().remove(0).params
    }

    #[test]
    fn offer() {
        let pmd = PerMessageDeflate::new(&WebSocketCompressionConfig::default(), None);
        assert_eq!(pmd.handshake_string(), "permessage-deflate; client_max_window_bits");
    }

    #[test]
    fn accepts_valid_responses() {
        for header in [
            "permessage-deflate",
            "permessage-deflate; client_max_window_bits=8",
            "permessage-deflate; client_max_window_bits=15; client_no_context_takeover",
            "permessage-deflate; server_no_context_takeover; server_max_window_bits=10",
        ] {
            assert!(negotiated(header).unwrap().is_enabled(), "{header}");
        }
    }

    #[test]
    fn rejects_bad_window_bits() {
        for value in ["7", "16", "08", "+9", "-9", "x", "9.0"] {
            let header = format!("permessage-deflate; client_max_window_bits={value}");
            assert_eq!(
                negotiated(&header).err(),
                Some(NegotiationError::InvalidParameter("client_max_window_bits")),
                "{value}"
            );
        }
        assert_eq!(
            negotiated("permessage-deflate; server_max_window_bits=16").err(),
            Some(NegotiationError::InvalidParameter("server_max_window_bits"))
        );
        assert_eq!(
            negotiated("permessage-deflate; server_max_window_bits").err(),
            Some(NegotiationError::MissingValue("server_max_window_bits"))
        );
    }

    #[test]
    fn rejects_unknown_and_valued_flags() {
        assert_eq!(
            negotiated("permessage-deflate; foo").err(),
            Some(NegotiationError::UnexpectedParameter)
        );
        assert_eq!(
            negotiated("permessage-deflate; client_no_context_takeover=1").err(),
            Some(NegotiationError::InvalidParameter("client_no_context_takeover"))
        );
    }

    #[test]
    fn rejects_duplicate_response() {
        assert_eq!(
            negotiated("permessage-deflate, permessage-deflate").err(),
            Some(NegotiationError::DuplicateResponse(EXTENSION_NAME.into()))
        );
    }

    #[test]
    fn disabled_is_a_no_op() {
        let mut pmd = PerMessageDeflate::new(&WebSocketCompressionConfig::default(), None);
        let mut frame = Frame::message(b"Hello".to_vec(), Data::Text, true);
        pmd.deflate(&mut frame).unwrap();
        assert_eq!(frame.payload(), b"Hello");
        assert!(!frame.header().rsv1);

        let mut compressed = Frame::message(b"garbage".to_vec(), Data::Text, true);
        compressed.header_mut().rsv1 = true;
        pmd.inflate(&mut compressed).unwrap();
        assert!(compressed.header().rsv1);
    }

    #[test]
    fn frame_round_trip() {
        let mut pmd = negotiated("permessage-deflate").unwrap();

        let mut frame = Frame::message(b"Hello".to_vec(), Data::Text, true);
        pmd.deflate(&mut frame).unwrap();
        pmd.reset_deflate_buffer();
        assert!(frame.header().rsv1);
        assert_eq!(frame.payload(), [0xf2, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00]);

        pmd.inflate(&mut frame).unwrap();
        pmd.reset_inflate_buffer();
        assert!(!frame.header().rsv1);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn short_and_control_frames_stay_plain() {
        let mut pmd = negotiated("permessage-deflate").unwrap();

        let mut short = Frame::message(b"hi".to_vec(), Data::Text, true);
        pmd.deflate(&mut short).unwrap();
        assert!(!short.header().rsv1);
        assert_eq!(short.payload(), b"hi");

        let mut ping = Frame::control(b"long enough".to_vec(), Control::Ping);
        pmd.deflate(&mut ping).unwrap();
        assert!(!ping.header().rsv1);
    }

    #[test]
    fn compress_bit_misuse() {
        let mut pmd = negotiated("permessage-deflate").unwrap();

        let mut claimed = Frame::message(b"Hello".to_vec(), Data::Text, true);
        claimed.header_mut().rsv1 = true;
        assert!(pmd.deflate(&mut claimed).is_err());

        let mut ping = Frame::control(Vec::new(), Control::Ping);
        ping.header_mut().rsv1 = true;
        assert_eq!(
            pmd.inflate(&mut ping),
            Err(ProtocolError::Compression("Received unexpected compressed frame".into()))
        );
    }

    #[test]
    fn fragmented_compressed_message() {
        let mut sender = negotiated("permessage-deflate").unwrap();
        let mut whole = Frame::message(b"Hello, Hello, Hello".to_vec(), Data::Text, true);
        sender.deflate(&mut whole).unwrap();
        let compressed = whole.payload().to_vec();
        let (head, tail) = compressed.split_at(3);

        let mut receiver = negotiated("permessage-deflate").unwrap();
        let mut first = Frame::message(head.to_vec(), Data::Text, false);
        first.header_mut().rsv1 = true;
        receiver.inflate(&mut first).unwrap();
        assert!(!first.header().rsv1);
        let mut out = first.payload().to_vec();
        receiver.reset_inflate_buffer();

        let mut last = Frame::message(tail.to_vec(), Data::Continuation, true);
        receiver.inflate(&mut last).unwrap();
        out.extend_from_slice(last.payload());
        assert_eq!(out, b"Hello, Hello, Hello");
    }

    #[test]
    fn second_compress_bit_inside_one_message() {
        let mut receiver = negotiated("permessage-deflate").unwrap();
        let mut first = Frame::message(vec![0xf2, 0x48], Data::Text, false);
        first.header_mut().rsv1 = true;
        receiver.inflate(&mut first).unwrap();

        let mut next = Frame::message(vec![0xcd], Data::Continuation, false);
        next.header_mut().rsv1 = true;
        assert_eq!(
            receiver.inflate(&mut next),
            Err(ProtocolError::Compression("Received unexpected compressed frame".into()))
        );
    }

    #[test]
    fn params_lookup() {
        let p = params("permessage-deflate; client_max_window_bits=10");
        assert_eq!(p.get("client_max_window_bits"), Some(Some("10")));
    }
}
