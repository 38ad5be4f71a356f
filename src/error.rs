//! Error types for the rxfer library.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use thiserror::Error;

/// Boxed error returned by [`Transport`](crate::Transport) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A structured HTTP response kept for inspection after a rejected transfer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code returned by the server.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, when one was received and could be read.
    pub body: Option<Bytes>,
}

/// Errors that can terminate a transfer or occur while setting one up.
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP client failed to move the data (connection, TLS, I/O while streaming).
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// A response arrived but could not be interpreted as an HTTP response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server answered with a status code outside the accepted range.
    #[error("unexpected HTTP status {}", .0.status)]
    HttpStatus(Box<HttpResponse>),

    /// The transfer succeeded but its payload could not be read back.
    #[error("failed to read payload: {0}")]
    PayloadRead(#[source] std::io::Error),

    /// The transfer was cancelled while still being observed.
    #[error("transfer cancelled")]
    Cancelled,

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error outside of a running transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns the rejected response for [`Error::HttpStatus`].
    #[must_use]
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::HttpStatus(response) => Some(&**response),
            _ => None,
        }
    }

    /// Returns the status code for [`Error::HttpStatus`].
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }
}

/// A specialized `Result` type for rxfer operations.
pub type Result<T> = std::result::Result<T, Error>;
