//! Transfer request description.

use std::path::PathBuf;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::error::{Error, Result};

/// Body attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// In-memory bytes.
    Bytes(Bytes),
    /// Contents of a file, streamed from disk.
    File(PathBuf),
}

/// Everything needed to issue one HTTP transfer.
///
/// Requests are plain values: a transfer clones what it needs when it starts,
/// so later changes to the caller's copy never affect a running transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: RequestBody,
}

impl TransferRequest {
    /// Creates a request with the given method.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a `POST` request.
    #[must_use]
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a `PUT` request.
    #[must_use]
    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Parses `url` and creates a request with the given method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the URL does not parse.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidRequest(format!("{url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the name or value is not a valid header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Replaces all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Target URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> &RequestBody {
        &self.body
    }
}
