//! Streaming ASR adapter contract.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::PipelineError;

/// Events an ASR adapter emits via its bound sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrEvent {
    /// Non-final text, may be superseded by a later partial or final.
    Partial(String),
    /// Finalized text. Finals must be non-empty, monotonically ordered, and
    /// mutually disjoint with respect to the acoustic interval they cover.
    Final(String),
    /// A terminal failure; the adapter transitions to stopped after this.
    Error(String),
}

/// Abstract streaming speech recognizer.
///
/// Implementations must guarantee: finals are non-empty and ordered; after
/// [`AsrAdapter::stop`] no further events are produced; on internal failure
/// a terminal [`AsrEvent::Error`] is emitted before stopping; if a session
/// ends with a pending partial but no corresponding final, one final equal
/// to the last non-empty partial is synthesized.
#[async_trait]
pub trait AsrAdapter: Send + Sync {
    /// Bind the adapter's output sink and the session it recognizes for.
    async fn bind(&self, sink: mpsc::Sender<AsrEvent>, session_id: String);

    /// Start recognition. Idempotent.
    async fn start(&self) -> Result<(), PipelineError>;

    /// Stop recognition. After this returns no further events are emitted.
    async fn stop(&self);

    /// Feed raw PCM audio to the recognizer.
    async fn feed(&self, pcm: &[i16]);

    /// Hook for wiring vendor-specific event callbacks. Reference adapters
    /// have no additional handlers to install.
    async fn setup_handlers(&self) {}
}

struct EchoState {
    sink: Option<mpsc::Sender<AsrEvent>>,
    session_id: String,
    running: bool,
    pending_partial: Option<String>,
}

/// A deterministic in-process [`AsrAdapter`] used for tests and as a
/// structural template for real vendor adapters. It performs no actual
/// recognition: [`EchoAsrAdapter::recognize`] lets a driver (test harness or
/// a future vendor implementation swapped in later) push text as though the
/// recognizer had produced it, while `feed` only accepts audio as the
/// contract requires.
pub struct EchoAsrAdapter {
    state: Mutex<EchoState>,
}

impl EchoAsrAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EchoState {
                sink: None,
                session_id: String::new(),
                running: false,
                pending_partial: None,
            }),
        }
    }

    /// Echo `text` as a partial transcript.
    pub async fn recognize_partial(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.pending_partial = Some(text.clone());
        if let Some(sink) = &state.sink {
            let _ = sink.send(AsrEvent::Partial(text)).await;
        }
    }

    /// Echo `text` as a final transcript, clearing any pending partial.
    pub async fn recognize_final(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.state.lock().await;
        if !state.running || text.is_empty() {
            return;
        }
        state.pending_partial = None;
        if let Some(sink) = &state.sink {
            let _ = sink.send(AsrEvent::Final(text)).await;
        }
    }
}

impl Default for EchoAsrAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsrAdapter for EchoAsrAdapter {
    async fn bind(&self, sink: mpsc::Sender<AsrEvent>, session_id: String) {
        let mut state = self.state.lock().await;
        state.sink = Some(sink);
        state.session_id = session_id;
    }

    async fn start(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.running = true;
        tracing::debug!(session_id = %state.session_id, "echo asr started");
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;
        if let Some(pending) = state.pending_partial.take() {
            if !pending.is_empty() {
                if let Some(sink) = &state.sink {
                    let _ = sink.send(AsrEvent::Final(pending)).await;
                }
            }
        }
        tracing::debug!(session_id = %state.session_id, "echo asr stopped");
    }

    async fn feed(&self, _pcm: &[i16]) {
        // No real recognizer; audio is accepted but not transcribed.
    }
}
