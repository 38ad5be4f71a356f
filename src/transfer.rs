//! Progress-observable transfers.
//!
//! [`Transfers`] starts one HTTP operation per call and hands back a
//! [`TransferStream`]: zero or more [`TransferEvent::Progress`] items followed
//! by exactly one terminal item, either [`TransferEvent::Complete`] or an
//! error. The stream is backed by a dedicated task that drives the transport,
//! combines its counters, and owns the transfer's registry entry.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::combine::CombineLatest;
use crate::config::TransferConfig;
use crate::error::{BoxError, Error, HttpResponse, Result};
use crate::event::{Progress, TransferEvent, TransferId, TransferKind};
use crate::progress::{ProgressCounters, ProgressSink};
use crate::registry::{ActiveTransfer, Registration, TransferRegistry};
use crate::request::{RequestBody, TransferRequest};
use crate::stats::{SpeedTracker, TransferStats};
use crate::transport::{RawResponse, ReqwestTransport, Transport};

/// Trait for receiving callbacks while a stream is drained with
/// [`TransferStream::finish_with`].
///
/// All methods have default no-op implementations for convenience.
pub trait TransferProgress: Send + Sync {
    /// Called before the first event is read.
    fn on_start(&self, _id: TransferId, _kind: TransferKind) {}

    /// Called for every progress event with the speed since the previous one.
    fn on_progress(&self, _id: TransferId, _progress: Progress, _speed: u64) {}

    /// Called when the transfer completes successfully.
    fn on_complete(&self, _id: TransferId, _stats: &TransferStats) {}

    /// Called when the transfer fails.
    fn on_error(&self, _id: TransferId, _error: &Error) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// Starts transfers and hands out their event streams.
pub struct Transfers<T: Transport = ReqwestTransport> {
    transport: Arc<T>,
    config: TransferConfig,
    registry: TransferRegistry,
}

impl<T: Transport> Clone for Transfers<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Transfers<ReqwestTransport> {
    /// Creates transfers backed by a `reqwest` client built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TransferConfig) -> Result<Self> {
        let transport = ReqwestTransport::from_config(&config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport + 'static> Transfers<T> {
    /// Creates transfers backed by a custom transport.
    #[must_use]
    pub fn with_transport(transport: T, config: TransferConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            registry: TransferRegistry::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the registry of in-flight transfers.
    #[must_use]
    pub const fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Lists in-flight transfers.
    #[must_use]
    pub fn active(&self) -> Vec<ActiveTransfer> {
        self.registry.active()
    }

    /// Cancels an in-flight transfer. Returns false if it already terminated.
    pub fn cancel(&self, id: TransferId) -> bool {
        self.registry.cancel(id)
    }

    /// Downloads the response body of `request` into memory.
    ///
    /// A body attached to `request` is sent along. Only `200 OK` counts as
    /// success.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn download(&self, request: TransferRequest) -> TransferStream<Bytes> {
        let transport = Arc::clone(&self.transport);
        self.start(TransferKind::Download, request, move |request, sink| async move {
            let raw = transport
                .download(&request, &sink)
                .await
                .map_err(transport_error)?;
            let status = parse_status(raw.status)?;
            if !TransferKind::Download.accepts(status) {
                let body = tokio::fs::read(&raw.body).await.ok().map(Bytes::from);
                return Err(rejected(status, raw.headers, body));
            }
            let data = tokio::fs::read(&raw.body)
                .await
                .map_err(Error::PayloadRead)?;
            Ok(Bytes::from(data))
        })
    }

    /// Sends `body` with `request` and yields the response body. `body`
    /// replaces any body already attached to `request`.
    ///
    /// Any status in `200..=399` counts as success.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn upload(
        &self,
        request: TransferRequest,
        body: impl Into<Bytes>,
    ) -> TransferStream<Option<Bytes>> {
        let request = request.with_body(RequestBody::Bytes(body.into()));
        let transport = Arc::clone(&self.transport);
        self.start(TransferKind::Upload, request, move |request, sink| async move {
            let raw = transport
                .upload(&request, &sink)
                .await
                .map_err(transport_error)?;
            accept(TransferKind::Upload, raw)
        })
    }

    /// Streams the file at `path` as the body of `request` and yields `path`
    /// on success. `path` replaces any body already attached to `request`. The response body is only kept for error reporting.
    ///
    /// Any status in `200..=399` counts as success.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn upload_file(
        &self,
        request: TransferRequest,
        path: impl Into<PathBuf>,
    ) -> TransferStream<PathBuf> {
        let path = path.into();
        let request = request.with_body(RequestBody::File(path.clone()));
        let transport = Arc::clone(&self.transport);
        self.start(TransferKind::FileUpload, request, move |request, sink| async move {
            let raw = transport
                .upload_file(&request, &sink)
                .await
                .map_err(transport_error)?;
            accept(TransferKind::FileUpload, raw)?;
            Ok(path)
        })
    }

    fn start<P, F, Fut>(
        &self,
        kind: TransferKind,
        request: TransferRequest,
        operation: F,
    ) -> TransferStream<P>
    where
        P: Send + 'static,
        F: FnOnce(TransferRequest, ProgressSink) -> Fut,
        Fut: Future<Output = Result<P>> + Send + 'static,
    {
        let id = TransferId::new();
        let (sink, counters) = ProgressSink::channel();
        let (tx, rx) = mpsc::channel(self.config.event_capacity());
        let cancel = CancellationToken::new();

        log::debug!("[{id}] starting {kind}: {} {}", request.method(), request.url());
        let registration = self.registry.register(
            id,
            kind,
            request.url().clone(),
            counters.clone(),
            cancel.clone(),
        );

        let driver = Driver {
            registration,
            id,
            kind,
            interval: self.config.debounce_for(kind),
            seed_expected: self.config.seed_expected_immediately,
            counters,
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(operation(request, sink)));

        TransferStream {
            id,
            kind,
            events: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

/// Passes crate errors raised by a transport through unchanged.
fn transport_error(e: BoxError) -> Error {
    match e.downcast::<Error>() {
        Ok(e) => *e,
        Err(e) => Error::Transport(e),
    }
}

fn parse_status(status: u16) -> Result<StatusCode> {
    StatusCode::from_u16(status)
        .map_err(|e| Error::MalformedResponse(format!("status code {status}: {e}")))
}

fn rejected(status: StatusCode, headers: HeaderMap, body: Option<Bytes>) -> Error {
    Error::HttpStatus(Box::new(HttpResponse {
        status,
        headers,
        body,
    }))
}

/// Validates an upload response and returns its body.
fn accept(kind: TransferKind, raw: RawResponse<Option<Bytes>>) -> Result<Option<Bytes>> {
    let status = parse_status(raw.status)?;
    if kind.accepts(status) {
        Ok(raw.body)
    } else {
        Err(rejected(status, raw.headers, raw.body))
    }
}

type Item<P> = Result<TransferEvent<P>>;

/// Per-transfer task state.
struct Driver<P> {
    registration: Registration,
    id: TransferId,
    kind: TransferKind,
    interval: Duration,
    seed_expected: bool,
    counters: ProgressCounters,
    tx: mpsc::Sender<Item<P>>,
    cancel: CancellationToken,
}

/// Progress waiting for room in the event channel.
///
/// Holds a single value: a newer one replaces it, so a slow observer sees
/// fewer events while the operation keeps running.
struct Outbox {
    pending: Option<Progress>,
    delivered: Progress,
    last_sent: Option<Instant>,
    seeded: bool,
}

impl Outbox {
    const fn new() -> Self {
        Self {
            pending: None,
            delivered: Progress::new(0, 0),
            last_sent: None,
            seeded: false,
        }
    }

    /// Earliest time the pending value may go out. A late delivery pushes the
    /// next one back, keeping the spacing between sent events.
    fn not_before(&self, interval: Duration, seed_expected: bool) -> Instant {
        let seed = seed_expected
            && !self.seeded
            && self
                .pending
                .is_some_and(|p| p.expected != self.delivered.expected);
        match self.last_sent {
            Some(at) if !seed => at + interval,
            _ => Instant::now(),
        }
    }

    fn take(&mut self) -> Option<Progress> {
        let progress = self.pending.take()?;
        if progress.expected != self.delivered.expected {
            self.seeded = true;
        }
        self.delivered = progress;
        self.last_sent = Some(Instant::now());
        Some(progress)
    }
}

impl<P: Send + 'static> Driver<P> {
    async fn run<Fut>(self, operation: Fut)
    where
        Fut: Future<Output = Result<P>> + Send,
    {
        let id = self.id;
        let finished = CancellationToken::new();
        let mut operation = Box::pin(operation);
        let mut progress = Box::pin(
            CombineLatest::new(
                self.counters.expected.clone(),
                self.counters.transferred.clone(),
            )
            .throttle(self.interval)
            .seed_left(self.seed_expected)
            .finish_on(finished.clone())
            .into_stream(),
        );

        let mut outbox = Outbox::new();
        let mut outcome = None;
        let mut progress_done = false;
        let outcome = loop {
            if progress_done && outcome.is_some() && outbox.pending.is_none() {
                break outcome;
            }
            let not_before = outbox.not_before(self.interval, self.seed_expected);
            let reserve = async {
                tokio::time::sleep_until(not_before).await;
                self.tx.reserve().await
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break None,
                result = &mut operation, if outcome.is_none() => {
                    finished.cancel();
                    outcome = Some(result);
                }
                permit = reserve, if outbox.pending.is_some() => match (permit, outbox.take()) {
                    (Ok(permit), Some(p)) => {
                        log::trace!("[{id}] {}/{} bytes", p.transferred, p.expected);
                        permit.send(Ok(TransferEvent::Progress(p)));
                    }
                    (Ok(_), None) => {}
                    (Err(_), _) => break None,
                },
                item = progress.next(), if !progress_done => match item {
                    Some((expected, transferred)) => {
                        outbox.pending = Some(Progress::new(transferred, expected));
                    }
                    None => progress_done = true,
                },
            }
        };

        // Release the connection and any temporary file before the terminal event.
        drop(progress);
        drop(operation);

        let item = match outcome {
            Some(Ok(payload)) => {
                log::debug!("[{id}] {} completed", self.kind);
                Ok(TransferEvent::Complete(payload))
            }
            Some(Err(e)) => {
                log::warn!("[{id}] {} failed: {e}", self.kind);
                Err(e)
            }
            None if self.tx.is_closed() => {
                log::debug!("[{id}] {} abandoned by its observer", self.kind);
                return;
            }
            None => {
                log::debug!("[{id}] {} cancelled", self.kind);
                Err(Error::Cancelled)
            }
        };

        // Unlisted before the observer can see the terminal item.
        let Self {
            registration, tx, ..
        } = self;
        drop(registration);
        let _ = tx.send(item).await;
    }
}

/// Event stream of one transfer.
///
/// Yields `Ok(Progress)` items followed by exactly one terminal item:
/// `Ok(Complete(payload))` or `Err(error)`. Dropping the stream cancels the
/// transfer.
pub struct TransferStream<T> {
    id: TransferId,
    kind: TransferKind,
    events: ReceiverStream<Item<T>>,
    _cancel_on_drop: DropGuard,
}

impl<T> std::fmt::Debug for TransferStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> TransferStream<T> {
    /// Identifier of this transfer.
    #[must_use]
    pub const fn id(&self) -> TransferId {
        self.id
    }

    /// Kind of this transfer.
    #[must_use]
    pub const fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Stops observing and aborts the transfer.
    pub fn cancel(self) {
        drop(self);
    }

    /// Drains the stream and returns the payload.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the transfer.
    pub async fn finish(self) -> Result<T> {
        self.finish_with(&NoProgress).await.map(|(payload, _)| payload)
    }

    /// Drains the stream, reporting every event to `progress`, and returns
    /// the payload with statistics.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the transfer.
    pub async fn finish_with(
        mut self,
        progress: &dyn TransferProgress,
    ) -> Result<(T, TransferStats)> {
        let id = self.id;
        progress.on_start(id, self.kind);
        let mut tracker = SpeedTracker::new();

        while let Some(item) = self.next().await {
            match item {
                Ok(TransferEvent::Progress(p)) => {
                    let speed = tracker.record(p);
                    progress.on_progress(id, p, speed);
                }
                Ok(TransferEvent::Complete(payload)) => {
                    let stats = tracker.finish();
                    progress.on_complete(id, &stats);
                    return Ok((payload, stats));
                }
                Err(e) => {
                    progress.on_error(id, &e);
                    return Err(e);
                }
            }
        }

        // Only reachable if the task died without a terminal item.
        let e = Error::Cancelled;
        progress.on_error(id, &e);
        Err(e)
    }
}

impl<T> Stream for TransferStream<T> {
    type Item = Result<TransferEvent<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::body_missing;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempPath;
    use tokio::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(100);

    /// What the mock transport does for every kind of request.
    #[derive(Clone, Default)]
    struct Script {
        expected: Option<u64>,
        /// (bytes, pause before reporting them in ms)
        chunks: Vec<(u64, u64)>,
        status: u16,
        body: &'static [u8],
        fail: Option<&'static str>,
        hang: bool,
        unreadable: bool,
    }

    impl Script {
        fn ok(status: u16, body: &'static [u8]) -> Self {
            Self {
                expected: Some(body.len() as u64),
                chunks: vec![(body.len() as u64, 0)],
                status,
                body,
                ..Self::default()
            }
        }
    }

    /// Sets a flag when the transport future is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockTransport {
        script: Script,
        dropped: Arc<AtomicBool>,
        temp_files: Mutex<Vec<PathBuf>>,
        bodies: Mutex<Vec<RequestBody>>,
    }

    impl MockTransport {
        fn new(script: Script) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        async fn play(&self, sink: &ProgressSink) -> std::result::Result<(), BoxError> {
            if let Some(total) = self.script.expected {
                sink.set_expected(total);
            }
            for &(bytes, pause) in &self.script.chunks {
                if pause > 0 {
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                }
                sink.advance(bytes);
            }
            if self.script.hang {
                std::future::pending::<()>().await;
            }
            if let Some(message) = self.script.fail {
                return Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    message,
                )));
            }
            Ok(())
        }

        fn body(&self) -> Option<Bytes> {
            (!self.script.body.is_empty()).then(|| Bytes::from_static(self.script.body))
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn download(
            &self,
            _request: &TransferRequest,
            sink: &ProgressSink,
        ) -> std::result::Result<RawResponse<TempPath>, BoxError> {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            let file = tempfile::NamedTempFile::new()?;
            std::fs::write(file.path(), self.script.body)?;
            let path = file.into_temp_path();
            self.temp_files.lock().unwrap().push(path.to_path_buf());

            self.play(sink).await?;

            let path = if self.script.unreadable {
                let gone = path.to_path_buf();
                drop(path);
                TempPath::from_path(gone)
            } else {
                path
            };
            Ok(RawResponse::new(self.script.status, path))
        }

        async fn upload(
            &self,
            request: &TransferRequest,
            sink: &ProgressSink,
        ) -> std::result::Result<RawResponse<Option<Bytes>>, BoxError> {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            if !matches!(request.body(), RequestBody::Bytes(_)) {
                return Err(body_missing("in-memory"));
            }
            self.bodies.lock().unwrap().push(request.body().clone());
            self.play(sink).await?;
            Ok(RawResponse::new(self.script.status, self.body()))
        }

        async fn upload_file(
            &self,
            request: &TransferRequest,
            sink: &ProgressSink,
        ) -> std::result::Result<RawResponse<Option<Bytes>>, BoxError> {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            let RequestBody::File(path) = request.body() else {
                return Err(body_missing("file"));
            };
            self.bodies.lock().unwrap().push(request.body().clone());
            let len = tokio::fs::metadata(path).await?.len();
            sink.set_expected(len);
            self.play(sink).await?;
            sink.record(len);
            Ok(RawResponse::new(self.script.status, self.body()))
        }
    }

    fn transfers(script: Script) -> Transfers<MockTransport> {
        Transfers::with_transport(MockTransport::new(script), TransferConfig::default())
    }

    fn request() -> TransferRequest {
        TransferRequest::parse(reqwest::Method::GET, "https://example.com/blob").unwrap()
    }

    /// Collects every item with the (virtual) time it was received.
    async fn collect<T>(stream: TransferStream<T>) -> Vec<(Item<T>, Instant)> {
        stream.map(|item| (item, Instant::now())).collect().await
    }

    /// Checks the stream shape: progress only, then exactly one terminal item.
    fn assert_shape<T>(items: &[(Item<T>, Instant)]) {
        let (last, rest) = items.split_last().expect("stream produced no items");
        assert!(!matches!(last.0, Ok(TransferEvent::Progress(_))));
        assert!(
            rest.iter()
                .all(|(item, _)| matches!(item, Ok(TransferEvent::Progress(_))))
        );
    }

    fn progress_of<T>(items: &[(Item<T>, Instant)]) -> Vec<(Progress, Instant)> {
        items
            .iter()
            .filter_map(|(item, at)| match item {
                Ok(TransferEvent::Progress(p)) => Some((*p, *at)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn download_completes_with_body() {
        let transfers = transfers(Script::ok(200, b"hello world"));
        let items = collect(transfers.download(request())).await;

        assert_shape(&items);
        match &items.last().unwrap().0 {
            Ok(TransferEvent::Complete(data)) => assert_eq!(data, &Bytes::from_static(b"hello world")),
            other => panic!("unexpected terminal item: {other:?}"),
        }
        let progress = progress_of(&items);
        assert_eq!(progress.last().map(|(p, _)| *p), Some(Progress::new(11, 11)));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_rate_limited() {
        let script = Script {
            expected: Some(1_000),
            chunks: (0..20).map(|_| (50, 20)).collect(),
            status: 200,
            body: b"payload",
            ..Script::default()
        };
        let transfers = transfers(script);
        let items = collect(transfers.download(request())).await;
        assert_shape(&items);

        let progress = progress_of(&items);
        assert!(progress.len() >= 2);
        assert!(progress.len() < 20);
        assert_eq!(progress.last().unwrap().0, Progress::new(1_000, 1_000));

        let mut seeded = false;
        for pair in progress.windows(2) {
            let ((prev, prev_at), (next, next_at)) = (pair[0], pair[1]);
            assert!(next.transferred >= prev.transferred);
            let first_with_total = !seeded && next.expected > 0 && prev.expected == 0;
            if next.expected > 0 {
                seeded = true;
            }
            if !first_with_total {
                assert!(next_at - prev_at >= INTERVAL);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_total_is_published_immediately() {
        let script = Script {
            expected: Some(400),
            chunks: vec![(100, 0), (100, 150), (200, 150)],
            status: 200,
            body: b"x",
            ..Script::default()
        };
        let transfers = transfers(script);
        let start = Instant::now();
        let mut stream = transfers.download(request());

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.progress().map(|p| p.expected), Some(400));
        assert_eq!(Instant::now(), start);

        let rest = collect(stream).await;
        assert_shape(&rest);
    }

    #[tokio::test(start_paused = true)]
    async fn download_not_found_is_http_status_error() {
        let transfers = transfers(Script::ok(404, b"not here"));
        let items = collect(transfers.download(request())).await;

        assert_shape(&items);
        let err = items.into_iter().last().unwrap().0.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            err.response().and_then(|r| r.body.clone()),
            Some(Bytes::from_static(b"not here"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn download_rejects_non_200_success() {
        let transfers = transfers(Script::ok(206, b"partial"));
        let err = transfers.download(request()).finish().await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::PARTIAL_CONTENT));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_payload_is_payload_read_error() {
        let script = Script {
            unreadable: true,
            ..Script::ok(200, b"gone")
        };
        let err = transfers(script).download(request()).finish().await.unwrap_err();
        assert!(matches!(err, Error::PayloadRead(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_passes_cause_through() {
        let script = Script {
            fail: Some("connection reset by peer"),
            ..Script::ok(200, b"never")
        };
        let transfers = transfers(script);
        let items = collect(transfers.download(request())).await;

        assert_shape(&items);
        match &items.last().unwrap().0 {
            Err(Error::Transport(cause)) => {
                assert_eq!(cause.to_string(), "connection reset by peer");
            }
            other => panic!("unexpected terminal item: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_status_is_malformed_response() {
        let err = transfers(Script::ok(42, b"?"))
            .upload(request(), "data")
            .finish()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_yields_response_body() {
        let transfers = transfers(Script::ok(201, b"{\"id\":7}"));
        let body = transfers
            .upload(TransferRequest::post(request().url().clone()), "payload")
            .finish()
            .await
            .unwrap();
        assert_eq!(body, Some(Bytes::from_static(b"{\"id\":7}")));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_with_empty_response_yields_none() {
        let body = transfers(Script::ok(204, b""))
            .upload(request(), "payload")
            .finish()
            .await
            .unwrap();
        assert_eq!(body, None);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_server_error_is_http_status_error() {
        let transfers = transfers(Script::ok(500, b"boom"));
        let items = collect(transfers.upload(request(), "payload")).await;
        assert_shape(&items);
        let err = items.into_iter().last().unwrap().0.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn file_upload_yields_input_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"a,b,c\n1,2,3\n").unwrap();

        let script = Script {
            status: 200,
            body: b"server says hi",
            ..Script::default()
        };
        let transfers = transfers(script);
        let items = collect(transfers.upload_file(request(), &path)).await;

        assert_shape(&items);
        match &items.last().unwrap().0 {
            Ok(TransferEvent::Complete(reference)) => assert_eq!(reference, &path),
            other => panic!("unexpected terminal item: {other:?}"),
        }
        assert_eq!(
            progress_of(&items).last().map(|(p, _)| *p),
            Some(Progress::new(12, 12))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn file_upload_redirect_counts_as_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"a").unwrap();
        let script = Script {
            status: 303,
            ..Script::default()
        };
        let uploaded = transfers(script)
            .upload_file(request(), &path)
            .finish()
            .await
            .unwrap();
        assert_eq!(uploaded, path);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stream_aborts_transfer() {
        let script = Script {
            expected: Some(100),
            chunks: vec![(10, 0)],
            hang: true,
            ..Script::default()
        };
        let transfers = transfers(script);
        let mut stream = transfers.download(request());
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(transfers.active().len(), 1);

        stream.cancel();
        while !transfers.active().is_empty() {
            tokio::task::yield_now().await;
        }

        let mock = transfers.transport();
        assert!(mock.dropped.load(Ordering::SeqCst));
        let temp_files = mock.temp_files.lock().unwrap().clone();
        assert_eq!(temp_files.len(), 1);
        assert!(!temp_files[0].exists());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_cancel_terminates_with_cancelled() {
        let script = Script {
            expected: Some(100),
            hang: true,
            ..Script::default()
        };
        let transfers = transfers(script);
        let mut stream = transfers.upload(request(), "abc");
        assert!(stream.next().await.unwrap().is_ok());

        assert!(transfers.cancel(stream.id()));
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
        assert!(transfers.active().is_empty());
        assert!(!transfers.cancel(stream.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_tracks_transfer_until_termination() {
        let script = Script {
            expected: Some(300),
            chunks: vec![(100, 0), (100, 200), (100, 200)],
            status: 200,
            body: b"abc",
            ..Script::default()
        };
        let transfers = transfers(script);
        let mut stream = transfers.download(request());
        let id = stream.id();

        stream.next().await.unwrap().unwrap();
        let active = transfers.registry().get(id).unwrap();
        assert_eq!(active.kind, TransferKind::Download);
        assert_eq!(active.url, *request().url());
        assert_eq!(active.progress.expected, 300);

        while let Some(item) = stream.next().await {
            item.unwrap();
        }
        assert!(transfers.registry().get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_transfers_are_independent() {
        let transfers = transfers(Script::ok(200, b"shared body"));
        let a = transfers.download(request());
        let b = transfers.download(request());
        assert_ne!(a.id(), b.id());
        assert_eq!(transfers.active().len(), 2);

        let (a, b) = tokio::join!(collect(a), collect(b));
        assert_shape(&a);
        assert_shape(&b);
        assert!(transfers.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_with_reports_callbacks() {
        #[derive(Default)]
        struct Counting {
            started: AtomicUsize,
            progress: AtomicUsize,
            completed: AtomicUsize,
            failed: AtomicUsize,
        }

        impl TransferProgress for Counting {
            fn on_start(&self, _id: TransferId, _kind: TransferKind) {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            fn on_progress(&self, _id: TransferId, _progress: Progress, _speed: u64) {
                self.progress.fetch_add(1, Ordering::SeqCst);
            }
            fn on_complete(&self, _id: TransferId, _stats: &TransferStats) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            fn on_error(&self, _id: TransferId, _error: &Error) {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let reporter = Counting::default();
        let transfers = transfers(Script::ok(200, b"twelve bytes"));
        let (data, stats) = transfers
            .download(request())
            .finish_with(&reporter)
            .await
            .unwrap();

        assert_eq!(data.len(), 12);
        assert_eq!(stats.bytes, 12);
        assert_eq!(stats.progress_events, reporter.progress.load(Ordering::SeqCst));
        assert_eq!(reporter.started.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.completed.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.failed.load(Ordering::SeqCst), 0);

        let failing = transfers_failing();
        assert!(failing.download(request()).finish_with(&reporter).await.is_err());
        assert_eq!(reporter.failed.load(Ordering::SeqCst), 1);
    }

    fn transfers_failing() -> Transfers<MockTransport> {
        transfers(Script::ok(503, b""))
    }

    #[tokio::test(start_paused = true)]
    async fn configured_interval_is_used() {
        let interval = Duration::from_millis(300);
        let config = TransferConfig::default()
            .with_debounce(TransferKind::Download, interval)
            .with_seed_expected_immediately(false);
        let script = Script {
            chunks: (0..10).map(|_| (10, 50)).collect(),
            status: 200,
            body: b"z",
            ..Script::default()
        };
        let transfers = Transfers::with_transport(MockTransport::new(script), config);
        let items = collect(transfers.download(request())).await;
        assert_shape(&items);

        let progress = progress_of(&items);
        assert_eq!(progress.last().map(|(p, _)| p.transferred), Some(100));
        for pair in progress.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unread_stream_does_not_stall_transport() {
        let script = Script {
            expected: Some(100),
            chunks: (0..10).map(|_| (10, 200)).collect(),
            status: 200,
            body: b"done",
            ..Script::default()
        };
        let config = TransferConfig::default().with_event_buffer(1);
        let transfers = Transfers::with_transport(MockTransport::new(script), config);
        let stream = transfers.download(request());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let active = transfers.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].progress, Progress::new(100, 100));

        let items = collect(stream).await;
        assert_shape(&items);
        let progress = progress_of(&items);
        assert!(progress.len() <= 3);
        assert_eq!(progress.last().map(|(p, _)| *p), Some(Progress::new(100, 100)));
        assert!(matches!(
            items.last().unwrap().0,
            Ok(TransferEvent::Complete(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_total_is_announced() {
        let script = Script {
            expected: Some(0),
            status: 200,
            ..Script::default()
        };
        let items = collect(transfers(script).download(request())).await;

        assert_shape(&items);
        let progress: Vec<_> = progress_of(&items).into_iter().map(|(p, _)| p).collect();
        assert_eq!(progress, vec![Progress::new(0, 0)]);
        match &items.last().unwrap().0 {
            Ok(TransferEvent::Complete(data)) => assert!(data.is_empty()),
            other => panic!("unexpected terminal item: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registry_is_cleared_before_terminal_item() {
        let transfers = transfers(Script::ok(200, b"abc"));
        let mut stream = transfers.download(request());
        loop {
            match stream.next().await {
                Some(Ok(TransferEvent::Complete(_))) => break,
                Some(Ok(TransferEvent::Progress(_))) => {}
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert!(transfers.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upload_body_travels_on_request() {
        let transfers = transfers(Script::ok(200, b""));
        let req = request().with_body(RequestBody::Bytes(Bytes::from_static(b"old")));
        transfers.upload(req, "new").finish().await.unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"f").unwrap();
        transfers.upload_file(request(), &path).finish().await.unwrap();

        let bodies = transfers.transport().bodies.lock().unwrap().clone();
        assert_eq!(
            bodies,
            vec![
                RequestBody::Bytes(Bytes::from_static(b"new")),
                RequestBody::File(path),
            ]
        );
    }

    #[tokio::test]
    async fn transport_request_errors_are_not_wrapped() {
        let err = transport_error(body_missing("file"));
        assert!(matches!(err, Error::InvalidRequest(_)));

        let cause: BoxError = Box::new(std::io::Error::other("reset"));
        assert!(matches!(transport_error(cause), Error::Transport(_)));
    }
}
