//! Combine-latest over two `watch` channels with rate-limited emission.
//!
//! Transfers publish their byte counters on `watch` channels. This module
//! turns a pair of such channels into a stream of `(left, right)` tuples:
//! a tuple is produced whenever either side changes, but never sooner than
//! the throttle interval after the previous one. Values that arrive while an
//! emission is held back replace each other, so only the latest is delivered.

use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Builder for a combined, throttled stream of two watched values.
pub struct CombineLatest<A, B> {
    left: watch::Receiver<A>,
    right: watch::Receiver<B>,
    interval: Duration,
    seed_left: bool,
    finish: CancellationToken,
}

impl<A, B> CombineLatest<A, B>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    B: Clone + PartialEq + Send + Sync + 'static,
{
    /// Combines two receivers. Without further configuration every change is
    /// emitted as soon as it is seen.
    #[must_use]
    pub fn new(left: watch::Receiver<A>, right: watch::Receiver<B>) -> Self {
        Self {
            left,
            right,
            interval: Duration::ZERO,
            seed_left: false,
            finish: CancellationToken::new(),
        }
    }

    /// Sets the minimum spacing between two emitted tuples.
    #[must_use]
    pub const fn throttle(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// When set, the first change on the left channel is emitted immediately,
    /// even inside a throttle window.
    #[must_use]
    pub const fn seed_left(mut self, seed: bool) -> Self {
        self.seed_left = seed;
        self
    }

    /// Ends the stream once `token` is cancelled, as if both senders had been
    /// dropped. A pending change is still flushed first.
    #[must_use]
    pub fn finish_on(mut self, token: CancellationToken) -> Self {
        self.finish = token;
        self
    }

    /// Converts the builder into a stream.
    ///
    /// The stream ends after both senders are dropped (or the finish token is
    /// cancelled) and the last pending change has been delivered.
    pub fn into_stream(self) -> impl Stream<Item = (A, B)> + Send + 'static {
        let last = (self.left.borrow().clone(), self.right.borrow().clone());
        let state = State {
            left: self.left,
            right: self.right,
            interval: self.interval,
            seed_left: self.seed_left,
            finish: self.finish,
            left_open: true,
            right_open: true,
            seeded: false,
            done: false,
            last,
            last_emit: None,
        };
        futures::stream::unfold(state, |mut state| async move {
            state.next().await.map(|item| (item, state))
        })
    }
}

struct State<A, B> {
    left: watch::Receiver<A>,
    right: watch::Receiver<B>,
    interval: Duration,
    seed_left: bool,
    finish: CancellationToken,
    left_open: bool,
    right_open: bool,
    seeded: bool,
    done: bool,
    last: (A, B),
    last_emit: Option<Instant>,
}

impl<A, B> State<A, B>
where
    A: Clone + PartialEq,
    B: Clone + PartialEq,
{
    fn current(&mut self) -> (A, B) {
        (
            self.left.borrow_and_update().clone(),
            self.right.borrow_and_update().clone(),
        )
    }

    /// True while the first left notification still has to be delivered.
    fn seed_pending(&self, from_left: bool) -> bool {
        self.seed_left && !self.seeded && (from_left || self.left.borrow().has_changed())
    }

    fn emit(&mut self, value: (A, B)) -> (A, B) {
        if value.0 != self.last.0 {
            self.seeded = true;
        }
        self.last = value.clone();
        self.last_emit = Some(Instant::now());
        value
    }

    async fn wait_window(&self) {
        if let Some(at) = self.last_emit {
            tokio::time::sleep_until(at + self.interval).await;
        }
    }

    async fn next(&mut self) -> Option<(A, B)> {
        loop {
            if self.done {
                return None;
            }

            if (!self.left_open && !self.right_open) || self.finish.is_cancelled() {
                self.done = true;
                if self.seed_pending(false) {
                    self.seeded = true;
                    let value = self.current();
                    return Some(self.emit(value));
                }
                if self.current() == self.last {
                    return None;
                }
                self.wait_window().await;
                let value = self.current();
                return Some(self.emit(value));
            }

            let from_left = tokio::select! {
                biased;
                () = self.finish.cancelled() => continue,
                res = self.left.changed(), if self.left_open => {
                    if res.is_err() {
                        self.left_open = false;
                        continue;
                    }
                    true
                }
                res = self.right.changed(), if self.right_open => {
                    if res.is_err() {
                        self.right_open = false;
                        continue;
                    }
                    false
                }
            };

            // The first left notification is delivered even if the value did
            // not change, so a total of zero is still announced.
            if self.seed_pending(from_left) {
                self.seeded = true;
                let value = self.current();
                return Some(self.emit(value));
            }

            let value = self.current();
            if value == self.last {
                continue;
            }

            self.wait_window().await;
            // Anything that arrived during the window supersedes `value`.
            let value = self.current();
            if value == self.last {
                continue;
            }
            return Some(self.emit(value));
        }
    }
}
