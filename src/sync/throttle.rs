//! Bandwidth throttling for sync transfers.
//!
//! Each transfer stream owns one [`BandwidthLimiter`]. The limiter keeps the
//! cumulative byte count and the time since it was created, and sleeps
//! whenever the stream is ahead of the configured average rate.

use humansize::{format_size, DECIMAL};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

/// Bandwidth limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandwidthLimit {
    /// Bytes per second limit, 0 for unlimited.
    pub bytes_per_second: u64,
}

impl BandwidthLimit {
    /// Create a new bandwidth limit.
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    /// No limit.
    pub fn unlimited() -> Self {
        Self { bytes_per_second: 0 }
    }

    /// Check if there's a limit.
    pub fn is_limited(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Human-readable ceiling, e.g. `1.50 MB/s`.
    pub fn display(&self) -> String {
        if self.is_limited() {
            format!("{}/s", format_size(self.bytes_per_second, DECIMAL))
        } else {
            "unlimited".to_string()
        }
    }
}

/// Average-rate limiter for a single transfer stream.
#[derive(Debug, Clone)]
pub struct BandwidthLimiter {
    limit: BandwidthLimit,
    started: Instant,
    bytes_so_far: u64,
}

impl BandwidthLimiter {
    /// Create a new bandwidth limiter. The clock starts now.
    pub fn new(limit: BandwidthLimit) -> Self {
        Self {
            limit,
            started: Instant::now(),
            bytes_so_far: 0,
        }
    }

    /// Create an unlimited limiter.
    pub fn unlimited() -> Self {
        Self::new(BandwidthLimit::unlimited())
    }

    /// Get the current limit.
    pub fn limit(&self) -> BandwidthLimit {
        self.limit
    }

    /// Bytes accounted so far.
    pub fn bytes_so_far(&self) -> u64 {
        self.bytes_so_far
    }

    /// How long to wait before moving `bytes` more bytes, if at all.
    pub fn delay_for(&self, bytes: u64) -> Option<Duration> {
        if !self.limit.is_limited() {
            return None;
        }
        let expected_ms = u128::from(self.bytes_so_far + bytes) * 1000
            / u128::from(self.limit.bytes_per_second);
        let actual_ms = self.started.elapsed().as_millis();
        if expected_ms > actual_ms {
            let wait = u64::try_from(expected_ms - actual_ms).unwrap_or(u64::MAX);
            Some(Duration::from_millis(wait))
        } else {
            None
        }
    }

    fn record(&mut self, bytes: u64) {
        self.bytes_so_far += bytes;
    }

    /// Wait until `bytes` more bytes fit under the limit, then account them.
    /// This is a no-op if no limit is set.
    pub async fn acquire(&mut self, bytes: usize) {
        let bytes = bytes as u64;
        if let Some(delay) = self.delay_for(bytes) {
            tokio::time::sleep(delay).await;
        }
        self.record(bytes);
    }

    /// Blocking version of [`acquire`](Self::acquire) for synchronous streams.
    pub fn acquire_blocking(&mut self, bytes: usize) {
        let bytes = bytes as u64;
        if let Some(delay) = self.delay_for(bytes) {
            std::thread::sleep(delay);
        }
        self.record(bytes);
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// An [`AsyncRead`] that paces its inner reader with a [`BandwidthLimiter`].
///
/// The wait for a chunk is taken before the following read, so a single read
/// never blocks the bytes it already returned.
pub struct ThrottledReader<R> {
    inner: R,
    limiter: BandwidthLimiter,
    pending: Option<Pin<Box<Sleep>>>,
}

impl<R> ThrottledReader<R> {
    pub fn new(inner: R, limit: BandwidthLimit) -> Self {
        Self {
            inner,
            limiter: BandwidthLimiter::new(limit),
            pending: None,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.limiter.bytes_so_far()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(sleep) = this.pending.as_mut() {
            ready!(sleep.as_mut().poll(cx));
            this.pending = None;
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = (buf.filled().len() - before) as u64;

        if read > 0 {
            if let Some(delay) = this.limiter.delay_for(read) {
                this.pending = Some(Box::pin(tokio::time::sleep(delay)));
            }
            this.limiter.record(read);
        }

        Poll::Ready(Ok(()))
    }
}

/// Byte count and wall time of one finished or running transfer, for logs.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub bytes_transferred: u64,
    started: Instant,
    finished: Option<Instant>,
}

impl TransferStats {
    pub fn start() -> Self {
        Self {
            bytes_transferred: 0,
            started: Instant::now(),
            finished: None,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    pub fn stop(&mut self) {
        self.finished.get_or_insert_with(Instant::now);
    }

    pub fn elapsed(&self) -> Duration {
        self.finished
            .map(|end| end.duration_since(self.started))
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Average bytes per second so far.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    pub fn rate_display(&self) -> String {
        format!("{}/s", format_size(self.rate() as u64, DECIMAL))
    }
}
