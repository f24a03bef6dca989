//! Streaming body relay.
//!
//! # Responsibilities
//! - Relay a body chunk by chunk without buffering it
//! - Apply the idle timeout between chunks
//! - Count the bytes that went through
//! - Signal progress, so a waiter can tell a busy body from a stalled one
//! - Keep per-request guards alive until the body is done

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes, HttpBody};
use axum::BoxError;
use futures_util::{StreamExt, TryStreamExt};
use metrics::Counter;
use tokio::sync::Notify;

use crate::resilience::timeouts::with_idle_timeout;

/// Running byte total for one body, mirrored into a metrics counter.
#[derive(Clone)]
pub struct ByteCount {
    total: Arc<AtomicU64>,
    counter: Counter,
    activity: Arc<Notify>,
}

impl ByteCount {
    pub fn new(counter: Counter) -> Self {
        Self {
            total: Arc::new(AtomicU64::new(0)),
            counter,
            activity: Arc::new(Notify::new()),
        }
    }

    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.counter.increment(n);
        self.activity.notify_one();
    }

    /// Bytes relayed so far.
    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Resolves once a chunk went through or the body ended.
    ///
    /// Activity that happened while nobody was waiting is remembered once.
    pub async fn activity(&self) {
        self.activity.notified().await;
    }

    fn mark_end(&self) {
        self.activity.notify_one();
    }
}

impl std::fmt::Debug for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ByteCount").field(&self.get()).finish()
    }
}

/// Wrap `body` so it is streamed with an idle timeout and counted.
///
/// A body that is already known to be empty stays empty, so no chunked
/// framing is added to bodiless messages. The end of the stream counts as
/// activity on `count`.
pub fn relay(body: Body, idle: Duration, count: ByteCount) -> Body {
    if body.is_end_stream() {
        return Body::empty();
    }

    let end = count.clone();
    let tail = futures_util::stream::once(async move {
        end.mark_end();
        None::<Result<Bytes, BoxError>>
    })
    .filter_map(std::future::ready);

    let stream = with_idle_timeout(body.into_data_stream(), idle)
        .inspect_ok(move |chunk| count.add(chunk.len() as u64))
        .chain(tail);
    Body::from_stream(stream)
}

/// Keep `guard` alive until `body` is fully sent or dropped.
pub fn attach_guard<G>(body: Body, guard: G) -> Body
where
    G: Send + 'static,
{
    if body.is_end_stream() {
        drop(guard);
        return body;
    }

    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Body::from_stream(stream)
}
