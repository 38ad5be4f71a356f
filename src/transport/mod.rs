//! HTTP client abstraction driven by [`Transfers`](crate::Transfers).

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tempfile::TempPath;

use crate::error::BoxError;
use crate::progress::ProgressSink;
use crate::request::TransferRequest;

pub use http::ReqwestTransport;

/// A response as delivered by a transport, before any validation.
///
/// The status is kept as a raw number; [`Transfers`](crate::Transfers) decides
/// whether it forms a valid HTTP response and whether it is acceptable.
#[derive(Debug)]
pub struct RawResponse<B> {
    /// Raw status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body in the shape the transfer kind produces.
    pub body: B,
}

impl<B> RawResponse<B> {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: u16, body: B) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// The HTTP operations a transfer needs.
///
/// Implementations move the data and keep `sink` up to date; they must not
/// interpret status codes. Every method may be cancelled at any await point
/// by dropping its future, which must release the connection and any
/// temporary files.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues the request and stores the response body in a temporary file.
    ///
    /// A body attached to the request is sent as is; `sink` counts received
    /// bytes only. The returned [`TempPath`] deletes the file when dropped.
    async fn download(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<TempPath>, BoxError>;

    /// Sends the request's in-memory body and returns the response body, if any.
    ///
    /// Fails with [`Error::InvalidRequest`](crate::Error::InvalidRequest) when
    /// the request does not carry [`RequestBody::Bytes`](crate::RequestBody::Bytes).
    async fn upload(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<Option<Bytes>>, BoxError>;

    /// Streams the request's file body and returns the response body, if any.
    ///
    /// Fails with [`Error::InvalidRequest`](crate::Error::InvalidRequest) when
    /// the request does not carry [`RequestBody::File`](crate::RequestBody::File).
    async fn upload_file(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<Option<Bytes>>, BoxError>;
}

/// Error for a request whose body does not fit the operation.
pub(crate) fn body_missing(expected: &str) -> BoxError {
    Box::new(crate::Error::InvalidRequest(format!(
        "request has no {expected} body"
    )))
}
