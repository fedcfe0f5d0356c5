//! `Sec-WebSocket-Extensions` negotiation.
//!
//! The header grammar (RFC 6455 section 9.1):
//!
//! ```text
//! extension-list  = 1#extension
//! extension       = token *( ";" extension-param )
//! extension-param = token [ "=" (token | quoted-string) ]
//! ```

use log::debug;

use crate::error::NegotiationError;

/// An extension implementation that takes part in the opening handshake.
pub trait ExtensionProcessor {
    /// The extension token, e.g. `permessage-deflate`.
    fn extension_token(&self) -> &str;

    /// The offer written into the request header.
    fn handshake_string(&self) -> String;

    /// Accept or reject the parameters the server answered with.
    fn process_response(&mut self, params: &ExtensionParams) -> Result<(), NegotiationError>;
}

/// Parameters of one extension in a response, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionParams(Vec<(String, Option<String>)>);

impl ExtensionParams {
    /// `None` if the parameter is absent, `Some(None)` if it is a bare token.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_deref())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: String, value: Option<String>) -> Result<(), NegotiationError> {
        if self.get(&key).is_some() {
            return Err(NegotiationError::DuplicateParameter(key));
        }
        self.0.push((key, value));
        Ok(())
    }
}

/// One extension from a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// The extension token.
    pub name: String,
    /// Its parameters.
    pub params: ExtensionParams,
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.params.0 {
            write!(f, "; {key}")?;
            if let Some(value) = value {
                write!(f, "={value}")?;
            }
        }
        Ok(())
    }
}

/// Builds the request header value, `None` when nothing is offered.
pub fn offer(processors: &[&dyn ExtensionProcessor]) -> Option<String> {
    if processors.is_empty() {
        return None;
    }
    let offers: Vec<String> = processors.iter().map(|p| p.handshake_string()).collect();
    Some(offers.join(", "))
}

/// Routes every extension of the response header to its processor.
///
/// Returns the accepted extensions in canonical form, the empty string if the
/// server accepted none.
pub fn negotiate(
    header: Option<&str>,
    processors: &mut [&mut dyn ExtensionProcessor],
) -> Result<String, NegotiationError> {
    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return Ok(String::new()),
    };
    if processors.is_empty() {
        return Err(NegotiationError::UnexpectedHeader);
    }

    let mut accepted = Vec::new();
    for extension in parse(header)? {
        let processor = processors
            .iter_mut()
            .find(|p| p.extension_token() == extension.name)
            .ok_or_else(|| NegotiationError::UnexpectedExtension(extension.name.clone()))?;
        processor.process_response(&extension.params)?;
        debug!("Accepted extension: {extension}");
        accepted.push(extension.to_string());
    }

    Ok(accepted.join(", "))
}

/// Parses a `Sec-WebSocket-Extensions` value.
pub fn parse(header: &str) -> Result<Vec<Extension>, NegotiationError> {
    let malformed = || NegotiationError::MalformedHeader(header.to_owned());
    let mut parser = Parser { input: header.as_bytes(), pos: 0 };
    let mut extensions = Vec::new();

    loop {
        let name = parser.token().ok_or_else(malformed)?;
        let mut params = ExtensionParams::default();

        while parser.consume(b';') {
            let key = parser.token().ok_or_else(malformed)?;
            let value = if parser.consume(b'=') {
                Some(parser.token_or_quoted_string().ok_or_else(malformed)?)
            } else {
                None
            };
            params.insert(key, value)?;
        }

        extensions.push(Extension { name, params });

        parser.skip_spaces();
        if parser.at_end() {
            return Ok(extensions);
        }
        if !parser.consume(b',') {
            return Err(malformed());
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.input.get(self.pos), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn consume(&mut self, c: u8) -> bool {
        self.skip_spaces();
        if self.input.get(self.pos) == Some(&c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn token(&mut self) -> Option<String> {
        self.skip_spaces();
        let start = self.pos;
        while self.input.get(self.pos).is_some_and(|&c| is_token_char(c)) {
            self.pos += 1;
        }
        (self.pos > start).then(|| String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn quoted_string(&mut self) -> Option<String> {
        self.skip_spaces();
        if self.input.get(self.pos) != Some(&b'"') {
            return None;
        }
        self.pos += 1;

        let mut value = Vec::new();
        loop {
            match *self.input.get(self.pos)? {
                b'"' => {
                    self.pos += 1;
                    return String::from_utf8(value).ok();
                },
                b'\\' => {
                    value.push(*self.input.get(self.pos + 1)?);
                    self.pos += 2;
                },
                c => {
                    value.push(c);
                    self.pos += 1;
                },
            }
        }
    }

    fn token_or_quoted_string(&mut self) -> Option<String> {
        self.token().or_else(|| self.quoted_string())
    }
}

/// RFC 2616 token characters: visible ASCII minus separators.
pub(crate) fn is_token_char(c: u8) -> bool {
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";
    (0x21..=0x7E).contains(&c) && !SEPARATORS.contains(&c)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct Recorder {
        token: &'static str,
        seen: Vec<ExtensionParams>,
        reject: bool,
    }

    impl ExtensionProcessor for Recorder {
        fn extension_token(&self) -> &str {
            self.token
        }

        fn handshake_string(&self) -> String {
            format!("{}; x", self.token)
        }

        fn process_response(&mut self, params: &ExtensionParams) -> Result<(), NegotiationError> {
            self.seen.push(params.clone());
            if self.reject {
                Err(NegotiationError::UnexpectedParameter)
            } else {
                Ok(())
            }
        }
    }

    fn recorder(token: &'static str) -> Recorder {
        Recorder { token, seen: Vec::new(), reject: false }
    }

    #[test]
    fn parses_params_and_quoted_strings() {
        let parsed = parse("foo; a; b=1 ,bar;c=\"x\\\"y\"").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "foo");
        assert_eq!(parsed[0].params.get("a"), Some(None));
        assert_eq!(parsed[0].params.get("b"), Some(Some("1")));
        assert_eq!(parsed[0].params.get("z"), None);
        assert_eq!(parsed[1].params.get("c"), Some(Some("x\"y")));
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", ";a", "foo;", "foo bar", "foo; a=", "foo; a=\"open", "foo,"] {
            assert!(
                matches!(parse(header), Err(NegotiationError::MalformedHeader(_))),
                "{header:?}"
            );
        }
    }

    #[test]
    fn rejects_duplicate_parameters() {
        assert_eq!(parse("foo; a; a=2"), Err(NegotiationError::DuplicateParameter("a".into())));
    }

    #[test]
    fn offer_joins_processors() {
        let (a, b) = (recorder("a"), recorder("b"));
        assert_eq!(offer(&[&a, &b]).as_deref(), Some("a; x, b; x"));
        assert_eq!(offer(&[]), None);
    }

    #[test]
    fn negotiate_routes_and_canonicalizes() {
        let mut a = recorder("a");
        let accepted = negotiate(Some("a ;k = v;   flag"), &mut [&mut a]).unwrap();
        assert_eq!(accepted, "a; k=v; flag");
        assert_eq!(a.seen.len(), 1);

        assert_eq!(negotiate(None, &mut [&mut a]), Ok(String::new()));
        assert_eq!(negotiate(Some("a"), &mut []), Err(NegotiationError::UnexpectedHeader));
    }

    #[test]
    fn negotiate_fails_on_unknown_or_rejected() {
        let mut a = recorder("a");
        assert_eq!(
            negotiate(Some("cc"), &mut [&mut a]),
            Err(NegotiationError::UnexpectedExtension("cc".into()))
        );

        let mut rejecting = Recorder { reject: true, ..recorder("a") };
        assert_eq!(
            negotiate(Some("a; zz"), &mut [&mut rejecting]),
            Err(NegotiationError::UnexpectedParameter)
        );
    }
}
