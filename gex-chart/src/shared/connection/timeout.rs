//! Idle-timeout wrapper for push streams.
//!
//! A push socket can go silent without an error or close frame. If nothing
//! arrives for the configured period the wrapper yields one
//! [`FeedError::ReadTimeout`] and then ends, which the connection manager treats
//! as an unexpected drop.

use crate::shared::error::FeedError;
use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Instant, Sleep};

#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
            expired: false,
        }
    }
}

impl<S, T> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<T, FeedError>> + Unpin,
{
    type Item = Result<T, FeedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.expired {
            return Poll::Ready(None);
        }
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "push read timeout, no data received"
                    );
                    self.expired = true;
                    Poll::Ready(Some(Err(FeedError::ReadTimeout(timeout_duration))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
