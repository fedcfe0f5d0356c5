//! Checks applied to the arguments of `WebSocket::connect`.

use url::Url;

use crate::{
    error::{ApiError, UrlError},
    protocol::extension::is_token_char,
};

/// Ports no WebSocket may connect to, the "bad ports" of the Fetch standard.
const BLOCKED_PORTS: &[u16] = &[
    1, 7, 9, 11, 13, 15, 17, 19, 20, 21, 22, 23, 25, 37, 42, 43, 53, 69, 77, 79, 87, 95, 101, 102, 103, 104, 109,
    110, 111, 113, 115, 117, 119, 123, 135, 137, 139, 143, 161, 179, 389, 427, 465, 512, 513, 514, 515, 526, 530,
    531, 532, 540, 548, 554, 556, 563, 587, 601, 636, 989, 990, 993, 995, 1719, 1720, 1723, 2049, 3659, 4045, 4190,
    5060, 5061, 6000, 6566, 6665, 6666, 6667, 6668, 6669, 6679, 6697, 10080,
];

/// Restrictions imposed by the context that opens the socket.
#[derive(Debug, Clone, Default)]
pub struct ConnectPolicy {
    /// The opener was itself loaded over a secure transport, so `ws://` is refused.
    pub secure_context: bool,
    /// Hosts that may be connected to. `None` allows every host.
    pub allowed_hosts: Option<Vec<String>>,
}

impl ConnectPolicy {
    fn check(&self, url: &Url) -> Result<(), ApiError> {
        if self.secure_context && url.scheme() == "ws" {
            return Err(ApiError::Security(
                "An insecure WebSocket connection may not be initiated from a page loaded over HTTPS.".into(),
            ));
        }

        if let Some(allowed) = &self.allowed_hosts {
            let host = url.host_str().unwrap_or_default();
            if !allowed.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                return Err(ApiError::Security(format!(
                    "Refused to connect to '{url}' because it violates the document's Content Security Policy."
                )));
            }
        }

        Ok(())
    }
}

/// Parses and validates a WebSocket URL.
pub fn parse_url(input: &str, policy: &ConnectPolicy) -> Result<Url, ApiError> {
    let url = Url::parse(input).map_err(|_| UrlError::Invalid(input.to_owned()))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_owned()).into());
    }
    if let Some(fragment) = url.fragment() {
        return Err(UrlError::Fragment(format!("#{fragment}")).into());
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost.into());
    }
    if let Some(port) = url.port() {
        if BLOCKED_PORTS.contains(&port) {
            return Err(UrlError::BlockedPort(port).into());
        }
    }

    policy.check(&url)?;
    Ok(url)
}

/// Validates the requested subprotocols and joins them for the handshake.
pub fn join_protocols(protocols: &[&str]) -> Result<String, ApiError> {
    for (i, protocol) in protocols.iter().enumerate() {
        if protocol.is_empty() || !protocol.bytes().all(is_token_char) {
            return Err(ApiError::Syntax(format!("The subprotocol '{}' is invalid.", encode_protocol(protocol))));
        }
        if protocols[..i].contains(protocol) {
            return Err(ApiError::Syntax(format!(
                "The subprotocol '{}' is duplicated.",
                encode_protocol(protocol)
            )));
        }
    }
    Ok(protocols.join(", "))
}

/// Escapes everything outside printable ASCII as `\uXXXX` for diagnostics.
fn encode_protocol(protocol: &str) -> String {
    let mut out = String::with_capacity(protocol.len());
    for unit in protocol.encode_utf16() {
        match unit {
            0x20..=0x7e if unit != u16::from(b'\\') => out.push(char::from(unit as u8)),
            _ => out.push_str(&format!("\\u{unit:04X}")),
        }
    }
    out
}
