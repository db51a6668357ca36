//! Idle read timeout for exchange WebSocket streams.
//!
//! Silent disconnections never surface as socket errors, so the kline feed wraps its read half in
//! a [`TimeoutStream`] that yields a terminal [`AlertError::Socket`] once no message arrives for
//! the configured period.

use crate::error::AlertError;
use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Default idle read timeout (2 minutes).
pub const DEFAULT_WS_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that resets a deadline on every item and fails once the deadline elapses.
///
/// After yielding the timeout error the stream ends.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
    timed_out: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            timed_out: false,
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_WS_READ_TIMEOUT)
    }
}

impl<S, T, E> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Into<AlertError>,
{
    type Item = Result<T, AlertError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.timed_out {
            return Poll::Ready(None);
        }

        let timeout_duration = self.timeout_duration;
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item.map_err(Into::into)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "kline read timeout, no data received"
                    );
                    self.timed_out = true;
                    Poll::Ready(Some(Err(AlertError::Socket(format!(
                        "kline read timeout: no data received for {} seconds",
                        timeout_duration.as_secs()
                    )))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
