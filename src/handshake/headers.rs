//! HTTP header conversion helpers

use http::{HeaderMap, HeaderName, HeaderValue};
use httparse::Header;

use crate::error::Result;

/// Limit for the number of header lines
pub const MAX_HEADERS: usize = 124;

/// Trait to convert raw objects into HTTP parse-able objects
pub(crate) trait FromHttparse<T>: Sized {
    /// Convert raw object into HTTP headers
    fn from_httparse(raw: T) -> Result<Self>;
}

/// Something that can be parsed incrementally from the front of a buffer.
pub trait TryParse: Sized {
    /// `Ok(None)` while incomplete, otherwise the bytes used and the value.
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>>;
}

impl<'b: 'h, 'h> FromHttparse<&'b [Header<'h>]> for HeaderMap {
    fn from_httparse(raw: &'b [Header<'h>]) -> Result<Self> {
        let mut headers = HeaderMap::new();

        for h in raw {
            headers.append(HeaderName::from_bytes(h.name.as_bytes())?, HeaderValue::from_bytes(h.value)?);
        }

        Ok(headers)
    }
}

/// Whether a comma separated header contains `token`, case-insensitively.
pub(crate) fn header_contains(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|s| s.trim().eq_ignore_ascii_case(token))
}

/// All values of a header joined with `", "`, as a client sees a repeated header.
pub(crate) fn joined_value(headers: &HeaderMap, name: &str) -> Result<Option<String>> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        values.push(value.to_str()?);
    }
    Ok((!values.is_empty()).then(|| values.join(", ")))
}
