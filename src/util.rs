//! Helpers for driving streams that may not be ready.

use std::io::{Error as IoError, ErrorKind as IoErrorKind};

/// An error that may only mean "try again later".
pub trait NonBlockingError: Sized {
    /// `None` if the operation merely was not ready, the error otherwise.
    fn into_non_blocking(self) -> Option<Self>;
}

impl NonBlockingError for IoError {
    fn into_non_blocking(self) -> Option<Self> {
        match self.kind() {
            // Read timeouts surface as `TimedOut` on some platforms.
            IoErrorKind::WouldBlock | IoErrorKind::TimedOut | IoErrorKind::Interrupted => None,
            _ => Some(self),
        }
    }
}

/// Turns "not ready" errors of a `Result` into `Ok(None)`.
pub trait NonBlockingResult {
    /// `Result<Option<T>, E>`.
    type Result;

    /// Performs the conversion.
    fn no_block(self) -> Self::Result;
}

impl<T, E: NonBlockingError> NonBlockingResult for Result<T, E> {
    type Result = Result<Option<T>, E>;

    fn no_block(self) -> Self::Result {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) => e.into_non_blocking().map_or(Ok(None), Err),
        }
    }
}
