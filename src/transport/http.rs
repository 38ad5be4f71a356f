//! [`Transport`] implementation on top of `reqwest`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::header::CONTENT_LENGTH;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{RawResponse, Transport, body_missing};
use crate::config::TransferConfig;
use crate::error::BoxError;
use crate::progress::ProgressSink;
use crate::request::{RequestBody, TransferRequest};

/// Builds a configured HTTP client.
fn build_http_client(config: &TransferConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
}

/// Transport backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    chunk_size: usize,
    temp_dir: Option<PathBuf>,
}

impl ReqwestTransport {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            chunk_size: TransferConfig::default().chunk_size,
            temp_dir: None,
        }
    }

    /// Builds a client from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn from_config(config: &TransferConfig) -> crate::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            chunk_size: config.chunk_size.max(1),
            temp_dir: config.temp_dir.clone(),
        })
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn request(&self, request: &TransferRequest) -> reqwest::RequestBuilder {
        self.client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
    }

    fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
    }
}

/// Attaches a request body to a download. Only received bytes are counted.
async fn attach_body(
    builder: reqwest::RequestBuilder,
    body: &RequestBody,
) -> Result<reqwest::RequestBuilder, BoxError> {
    Ok(match body {
        RequestBody::Empty => builder,
        RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
        RequestBody::File(path) => {
            let file = tokio::fs::File::open(path).await?;
            let len = file.metadata().await?.len();
            builder
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
        }
    })
}

async fn read_response(
    response: reqwest::Response,
) -> Result<RawResponse<Option<Bytes>>, BoxError> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok(RawResponse {
        status,
        headers,
        body: (!body.is_empty()).then_some(body),
    })
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn download(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<TempPath>, BoxError> {
        let response = attach_body(self.request(request), request.body())
            .await?
            .send()
            .await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        if let Some(len) = response.content_length() {
            sink.set_expected(len);
        }

        let (file, path) = self.temp_file()?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            sink.advance(chunk.len() as u64);
        }
        file.flush().await?;

        Ok(RawResponse {
            status,
            headers,
            body: path,
        })
    }

    async fn upload(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<Option<Bytes>>, BoxError> {
        let RequestBody::Bytes(body) = request.body() else {
            return Err(body_missing("in-memory"));
        };
        let body = body.clone();
        let len = body.len();
        sink.set_expected(len as u64);

        let chunk_size = self.chunk_size.max(1);
        let counter = sink.clone();
        let pieces = (0..len)
            .step_by(chunk_size)
            .map(move |start| body.slice(start..(start + chunk_size).min(len)));
        let body = stream::iter(pieces).map(move |piece| {
            counter.advance(piece.len() as u64);
            Ok::<_, std::io::Error>(piece)
        });

        let response = self
            .request(request)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        read_response(response).await
    }

    async fn upload_file(
        &self,
        request: &TransferRequest,
        sink: &ProgressSink,
    ) -> Result<RawResponse<Option<Bytes>>, BoxError> {
        let RequestBody::File(path) = request.body() else {
            return Err(body_missing("file"));
        };
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        sink.set_expected(len);

        let counter = sink.clone();
        let body = ReaderStream::with_capacity(file, self.chunk_size.max(1))
            .inspect_ok(move |chunk| counter.advance(chunk.len() as u64));

        let response = self
            .request(request)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        read_response(response).await
    }
}
