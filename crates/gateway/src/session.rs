//! Per-run session: the hand-off between a worker thread and its stream.
//!
//! The worker pushes events through a [`RunEmitter`] (never blocks, callable
//! from any thread). The HTTP side drains them through the session's single
//! [`SessionStream`], which suspends while the queue is empty and ends right
//! after the first terminal event.

use crate::registry::RunId;
use dexter_agent::EventSink;
use dexter_core::RunEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Shared between the session, its emitters and its stream.
#[derive(Default)]
struct SessionState {
    finished: AtomicBool,
    terminated: AtomicBool,
    dropped_events: AtomicU64,
    error: Mutex<Option<String>>,
}

impl SessionState {
    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Runtime bridge for exactly one run.
pub struct RunSession {
    run_id: RunId,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<RunEvent>>>,
    state: Arc<SessionState>,
}

impl RunSession {
    /// Create a session and the producer handle for its worker.
    ///
    /// The session keeps no sender of its own: once every emitter is gone the
    /// stream can tell the run ended.
    pub fn new(run_id: RunId) -> (Self, RunEmitter) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(SessionState::default());

        let emitter = RunEmitter {
            run_id: run_id.clone(),
            sender,
            state: state.clone(),
        };
        let session = Self {
            run_id,
            receiver: Mutex::new(Some(receiver)),
            state,
        };
        (session, emitter)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Take the consumer side. Only the first call gets it.
    pub fn stream(&self) -> Option<SessionStream> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;

        Some(SessionStream {
            run_id: self.run_id.clone(),
            inner: UnboundedReceiverStream::new(receiver),
            state: self.state.clone(),
            done: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Failure text recorded by the worker, if the run failed.
    pub fn error(&self) -> Option<String> {
        self.state.error()
    }

    /// Events emitted after the consumer went away.
    pub fn dropped_events(&self) -> u64 {
        self.state.dropped_events.load(Ordering::SeqCst)
    }
}

/// Producer handle for a session. Cheap to clone.
#[derive(Clone)]
pub struct RunEmitter {
    run_id: RunId,
    sender: mpsc::UnboundedSender<RunEvent>,
    state: Arc<SessionState>,
}

impl RunEmitter {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Queue an event for the stream.
    ///
    /// Nothing is queued after a terminal event. If the consumer is gone the
    /// event is counted as dropped.
    pub fn emit(&self, event: RunEvent) {
        let already_terminated = if event.is_terminal() {
            self.state.terminated.swap(true, Ordering::SeqCst)
        } else {
            self.state.terminated.load(Ordering::SeqCst)
        };
        if already_terminated {
            debug!(run_id = %self.run_id, event = event.event_type(), "Ignoring event after terminal event");
            return;
        }

        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            let dropped = self.state.dropped_events.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                run_id = %self.run_id,
                event = event.event_type(),
                dropped,
                "Stream consumer gone, event dropped"
            );
        }
    }

    /// Record the failure on the session and emit the terminal `error` event.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut error = self.state.error.lock().unwrap_or_else(|e| e.into_inner());
            if error.is_none() {
                *error = Some(message.clone());
            }
        }
        self.emit(RunEvent::Error { message });
    }

    pub fn mark_finished(&self) {
        self.state.mark_finished();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }
}

impl EventSink for RunEmitter {
    fn emit(&self, event: RunEvent) {
        RunEmitter::emit(self, event);
    }
}

/// The single consumer of a session's events.
pub struct SessionStream {
    run_id: RunId,
    inner: UnboundedReceiverStream<RunEvent>,
    state: Arc<SessionState>,
    done: bool,
}

impl SessionStream {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn finish(&mut self) {
        self.done = true;
        self.state.mark_finished();
    }
}

impl Stream for SessionStream {
    type Item = RunEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finish();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Every producer is gone without a terminal event.
                this.finish();
                let message = this
                    .state
                    .error()
                    .unwrap_or_else(|| "Run ended without a result".to_string());
                Poll::Ready(Some(RunEvent::Error { message }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.state.mark_finished();
    }
}
