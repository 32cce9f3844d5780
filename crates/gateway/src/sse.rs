//! SSE framing for run event streams.

use crate::registry::{RunId, SessionRegistry};
use crate::session::SessionStream;
use axum::response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse};
use dexter_core::RunEvent;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Compact JSON for one event. Non-ASCII text is kept as is.
pub fn frame_data(event: &RunEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

/// One SSE frame: the event JSON in the `data` field, no event name.
pub fn encode(event: &RunEvent) -> SseEvent {
    SseEvent::default().data(frame_data(event))
}

/// Removes its run from the registry when dropped.
struct Reaper {
    registry: Arc<SessionRegistry>,
    run_id: RunId,
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if self.registry.remove(&self.run_id).is_some() {
            debug!(run_id = %self.run_id, "Session reaped");
        }
    }
}

/// A session stream encoded as SSE frames.
///
/// The run is reaped as soon as the stream ends, or when the response is
/// dropped early (client disconnect).
pub struct RunEventStream {
    inner: SessionStream,
    reaper: Option<Reaper>,
}

impl RunEventStream {
    pub fn new(inner: SessionStream, registry: Arc<SessionRegistry>) -> Self {
        let run_id = inner.run_id().clone();
        Self {
            inner,
            reaper: Some(Reaper { registry, run_id }),
        }
    }
}

impl Stream for RunEventStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(encode(&event)))),
            Poll::Ready(None) => {
                this.reaper.take();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// SSE response body for one run, with keep-alive comments interleaved.
pub type RunSse = Sse<KeepAliveStream<RunEventStream>>;

/// Wrap a session stream into an SSE response with keep-alive comments.
pub fn into_response(inner: SessionStream, registry: Arc<SessionRegistry>) -> RunSse {
    Sse::new(RunEventStream::new(inner, registry))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
