//! Client side of the opening handshake, without I/O.
//!
//! The channel writes [`ClientHandshake::request`] once the transport is open,
//! feeds received bytes to [`ClientHandshake::read_response`] until a full
//! response head is available and then calls [`ClientHandshake::verify`].

use http::{header, HeaderMap, Method, Request as HttpRequest, Response as HttpResponse, StatusCode, Version};
use httparse::{Status, EMPTY_HEADER};
use url::Url;

use crate::{
    error::{Error, ProtocolError, Result, SubProtocolError, UrlError},
    handshake::{
        derive_accept_key, generate_key,
        headers::{header_contains, joined_value, FromHttparse, TryParse, MAX_HEADERS},
    },
    protocol::extension::{self, ExtensionProcessor},
};

/// Client Request type
pub type Request = HttpRequest<()>;
/// Client Response Type
pub type Response = HttpResponse<Option<Vec<u8>>>;

/// Headers in the order they are written on the wire.
const REQUEST_HEADERS: [&str; 9] = [
    "Host",
    "Upgrade",
    "Connection",
    "Pragma",
    "Cache-Control",
    "Sec-WebSocket-Key",
    "Sec-WebSocket-Version",
    "Sec-WebSocket-Protocol",
    "Sec-WebSocket-Extensions",
];

/// What the server agreed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accepted {
    /// The selected subprotocol, empty if none.
    pub protocol: String,
    /// The accepted extensions in canonical form, empty if none.
    pub extensions: String,
}

/// Client handshake
#[derive(Debug)]
pub struct ClientHandshake {
    request: Vec<u8>,
    accept_key: String,
    subprotocols: Option<Vec<String>>,
}

impl ClientHandshake {
    /// Prepares the upgrade request for `url`.
    ///
    /// `protocol` is the comma separated subprotocol list (empty for none) and
    /// `extensions` the extension offer, if any.
    pub fn new(url: &Url, protocol: &str, extensions: Option<&str>) -> Result<Self> {
        Self::with_key(url, protocol, extensions, generate_key())
    }

    fn with_key(url: &Url, protocol: &str, extensions: Option<&str>, key: String) -> Result<Self> {
        let request = build_request(url, protocol, extensions, &key)?;
        let subprotocols = (!protocol.is_empty())
            .then(|| protocol.split(',').map(|s| s.trim().to_owned()).collect());

        Ok(ClientHandshake {
            request: generate_request(&request)?,
            accept_key: derive_accept_key(key.as_bytes()),
            subprotocols,
        })
    }

    /// The serialized upgrade request.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Tries to parse a response head from the front of `data`.
    pub fn read_response(&self, data: &[u8]) -> Result<Option<(usize, Response)>> {
        Response::try_parse(data)
    }

    /// Checks a complete response and negotiates extensions with `processors`.
    pub fn verify(
        &self,
        res: Response,
        processors: &mut [&mut dyn ExtensionProcessor],
    ) -> Result<Accepted> {
        if res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::Http(Box::new(res)));
        }

        let headers = res.headers();

        if !header_contains(headers, "Upgrade", "websocket") {
            return Err(Error::Protocol(ProtocolError::MissingUpgradeHeader));
        }

        if !header_contains(headers, "Connection", "Upgrade") {
            return Err(Error::Protocol(ProtocolError::MissingConnectionUpgradeHeader));
        }

        if !headers.get("Sec-WebSocket-Accept").map(|h| h == self.accept_key.as_str()).unwrap_or(false) {
            return Err(Error::Protocol(ProtocolError::AcceptKeyMismatch));
        }

        let protocol = self.verify_subprotocol(headers)?;

        let offered = joined_value(headers, "Sec-WebSocket-Extensions")?;
        let extensions = extension::negotiate(offered.as_deref(), processors)?;

        Ok(Accepted { protocol, extensions })
    }

    fn verify_subprotocol(&self, headers: &HeaderMap) -> Result<String> {
        let returned = headers.get("Sec-WebSocket-Protocol").map(|h| h.to_str()).transpose()?;

        match (returned, &self.subprotocols) {
            (None, None) => Ok(String::new()),
            (None, Some(_)) => Err(SubProtocolError::NoSubProtocol.into()),
            (Some(_), None) => Err(SubProtocolError::ServerSentSubProtocolNoneRequested.into()),
            (Some(returned), Some(requested)) => {
                if requested.iter().any(|p| p == returned) {
                    Ok(returned.to_owned())
                } else {
                    Err(SubProtocolError::InvalidSubProtocol.into())
                }
            },
        }
    }
}

impl From<SubProtocolError> for Error {
    fn from(value: SubProtocolError) -> Self {
        Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(value))
    }
}

fn build_request(url: &Url, protocol: &str, extensions: Option<&str>, key: &str) -> Result<Request> {
    let host = url.host_str().ok_or(Error::Url(UrlError::MissingHost))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };

    let mut builder = HttpRequest::builder()
        .method(Method::GET)
        .uri(path)
        .version(Version::HTTP_11)
        .header(header::HOST, host)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::PRAGMA, "no-cache")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::SEC_WEBSOCKET_KEY, key)
        .header(header::SEC_WEBSOCKET_VERSION, "13");

    if !protocol.is_empty() {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    if let Some(extensions) = extensions {
        builder = builder.header(header::SEC_WEBSOCKET_EXTENSIONS, extensions);
    }

    Ok(builder.body(())?)
}

/// Writes the request head with canonical header names.
fn generate_request(request: &Request) -> Result<Vec<u8>> {
    let path = request.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut req = format!("GET {path} HTTP/1.1\r\n");

    for name in REQUEST_HEADERS {
        if let Some(value) = request.headers().get(name) {
            req.push_str(&format!("{name}: {}\r\n", value.to_str()?));
        }
    }

    req.push_str("\r\n");
    Ok(req.into_bytes())
}

impl TryParse for Response {
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut hbuffer = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Response::new(&mut hbuffer);

        Ok(match req.parse(data)? {
            Status::Partial => None,
            Status::Complete(n) => Some((n, Response::from_httparse(req)?)),
        })
    }
}

impl<'b: 'h, 'h> FromHttparse<httparse::Response<'h, 'b>> for Response {
    fn from_httparse(raw: httparse::Response<'h, 'b>) -> Result<Self> {
        if raw.version != Some(1) {
            return Err(Error::Protocol(ProtocolError::InvalidHttpVersion));
        }

        let headers = HeaderMap::from_httparse(raw.headers)?;
        let code = raw.code.ok_or(Error::Protocol(ProtocolError::IncompleteHandshake))?;

        let mut res = Response::new(None);
        *res.status_mut() = StatusCode::from_u16(code)?;
        *res.headers_mut() = headers;
        *res.version_mut() = Version::HTTP_11;

        Ok(res)
    }
}
