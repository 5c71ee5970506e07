//! Per-connection session state and the process-wide session registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// Bounded queue capacity shared by every per-session channel.
pub const QUEUE_CAPACITY: usize = 32;

/// All state tied to one client connection.
///
/// `asr_out` and `llm_in` collapse to a single handoff queue (`llm_in_tx`);
/// the distinction in spec is logical only. Both queues are owned by
/// `Session` itself, each behind a `Mutex<Receiver>` paired with a
/// `Notify`: the worker loop only ever holds the lock for the instant of a
/// `try_recv`, never across an `.await`, so [`Self::drain_llm_in`] and
/// [`Self::drain_tts_in`] can run concurrently with a parked worker instead
/// of queueing up behind it.
pub struct Session {
    pub id: String,
    last_activity: Mutex<Instant>,
    interrupted: AtomicBool,
    llm_in_flight: AtomicBool,
    tts_in_flight: AtomicBool,
    /// Set whenever a new utterance begins (a final transcript is
    /// dispatched); consumed by the TTS worker to tag the first sentence
    /// of the reply with `is_first`.
    first_sentence: AtomicBool,

    /// Finalized ASR transcripts, handed off to the LLM worker.
    llm_in_tx: mpsc::Sender<String>,
    llm_in_rx: Mutex<mpsc::Receiver<String>>,
    llm_in_notify: Notify,
    /// Sentences ready for synthesis, handed off to the TTS worker.
    tts_in_tx: mpsc::Sender<String>,
    tts_in_rx: Mutex<mpsc::Receiver<String>>,
    tts_in_notify: Notify,

    /// Cancelled to tear down every worker task owned by this session.
    pub cancel: CancellationToken,
    /// Handle to the currently-running LLM generation, if any.
    current_llm: Mutex<Option<CancellationToken>>,
    /// Handle to the currently-running TTS synthesis, if any.
    current_tts: Mutex<Option<CancellationToken>>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (llm_in_tx, llm_in_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (tts_in_tx, tts_in_rx) = mpsc::channel(QUEUE_CAPACITY);

        Arc::new(Self {
            id: id.into(),
            last_activity: Mutex::new(Instant::now()),
            interrupted: AtomicBool::new(false),
            llm_in_flight: AtomicBool::new(false),
            tts_in_flight: AtomicBool::new(false),
            first_sentence: AtomicBool::new(true),
            llm_in_tx,
            llm_in_rx: Mutex::new(llm_in_rx),
            llm_in_notify: Notify::new(),
            tts_in_tx,
            tts_in_rx: Mutex::new(tts_in_rx),
            tts_in_notify: Notify::new(),
            cancel: CancellationToken::new(),
            current_llm: Mutex::new(None),
            current_tts: Mutex::new(None),
        })
    }

    /// Push a finalized transcript onto the LLM handoff queue.
    pub async fn push_llm_in(&self, content: String) {
        if self.llm_in_tx.send(content).await.is_ok() {
            self.llm_in_notify.notify_one();
        }
    }

    /// Push a sentence onto the TTS queue.
    pub async fn push_tts_in(&self, sentence: String) {
        if self.tts_in_tx.send(sentence).await.is_ok() {
            self.tts_in_notify.notify_one();
        }
    }

    /// Dequeue the next finalized transcript, waiting while the queue is
    /// empty. `None` once the sender side is gone (session teardown).
    pub async fn next_llm_in(&self) -> Option<String> {
        loop {
            {
                let mut rx = self.llm_in_rx.lock().await;
                match rx.try_recv() {
                    Ok(item) => return Some(item),
                    Err(TryRecvError::Disconnected) => return None,
                    Err(TryRecvError::Empty) => {}
                }
            }
            self.llm_in_notify.notified().await;
        }
    }

    /// Dequeue the next sentence ready for synthesis, waiting while the
    /// queue is empty. `None` once the sender side is gone.
    pub async fn next_tts_in(&self) -> Option<String> {
        loop {
            {
                let mut rx = self.tts_in_rx.lock().await;
                match rx.try_recv() {
                    Ok(item) => return Some(item),
                    Err(TryRecvError::Disconnected) => return None,
                    Err(TryRecvError::Empty) => {}
                }
            }
            self.tts_in_notify.notified().await;
        }
    }

    /// Drain every pending transcript from `llm_in` without dispatching it.
    pub async fn drain_llm_in(&self) {
        let mut rx = self.llm_in_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Drain every pending sentence from `tts_in` without synthesizing it.
    pub async fn drain_tts_in(&self) {
        let mut rx = self.tts_in_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    pub async fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.lock().await.elapsed() > timeout
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn set_interrupted(&self, value: bool) {
        self.interrupted.store(value, Ordering::SeqCst);
    }

    #[must_use]
    pub fn llm_in_flight(&self) -> bool {
        self.llm_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_llm_in_flight(&self, value: bool) {
        self.llm_in_flight.store(value, Ordering::SeqCst);
    }

    #[must_use]
    pub fn tts_in_flight(&self) -> bool {
        self.tts_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_tts_in_flight(&self, value: bool) {
        self.tts_in_flight.store(value, Ordering::SeqCst);
    }

    /// Register the cancellation handle for a freshly-started LLM
    /// generation, cancelling whatever generation preceded it.
    pub async fn begin_llm_task(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        let mut slot = self.current_llm.lock().await;
        if let Some(prev) = slot.replace(token.clone()) {
            prev.cancel();
        }
        token
    }

    /// Register the cancellation handle for a freshly-started TTS
    /// synthesis, cancelling whatever synthesis preceded it.
    pub async fn begin_tts_task(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        let mut slot = self.current_tts.lock().await;
        if let Some(prev) = slot.replace(token.clone()) {
            prev.cancel();
        }
        token
    }

    /// Cancel any in-flight LLM generation without starting a new one.
    pub async fn cancel_llm_task(&self) {
        if let Some(token) = self.current_llm.lock().await.take() {
            token.cancel();
        }
    }

    /// Cancel any in-flight TTS synthesis without starting a new one.
    pub async fn cancel_tts_task(&self) {
        if let Some(token) = self.current_tts.lock().await.take() {
            token.cancel();
        }
    }

    /// Set `interrupted`, cancel in-flight LLM/TTS work, and drain both
    /// queues without emission. Leaves the ASR adapter running.
    pub async fn request_interrupt(&self) {
        self.set_interrupted(true);
        self.cancel_llm_task().await;
        self.cancel_tts_task().await;
        self.drain_llm_in().await;
        self.drain_tts_in().await;
    }

    pub fn clear_interrupt(&self) {
        self.set_interrupted(false);
    }

    /// Mark that the next sentence synthesized belongs to a fresh utterance.
    pub fn mark_new_utterance(&self) {
        self.first_sentence.store(true, Ordering::SeqCst);
    }

    /// Consume the first-sentence flag: true at most once per utterance.
    pub fn take_first_sentence_flag(&self) -> bool {
        self.first_sentence.swap(false, Ordering::SeqCst)
    }
}

/// Errors while registering or evicting a session — placeholder for
/// future per-session registry failures. Currently infallible; kept as a
/// typed surface so callers don't match on `()`.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session {0} not found")]
    NotFound(String),
}

/// Process-wide registry of live sessions with periodic inactivity sweep.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Scan all sessions; for each idle longer than `timeout`, cancel
    /// in-flight TTS and remove it. Tolerates per-session failures —
    /// logs and continues rather than aborting the sweep.
    pub async fn sweep(&self, timeout: Duration) {
        let stale: Vec<String> = {
            let guard = self.sessions.read().await;
            let mut ids = Vec::new();
            for (id, session) in guard.iter() {
                if session.is_inactive(timeout).await {
                    ids.push(id.clone());
                }
            }
            ids
        };

        for id in stale {
            if let Some(session) = self.sessions.write().await.remove(&id) {
                session.cancel_tts_task().await;
                session.cancel.cancel();
                tracing::info!(session_id = %id, "swept inactive session");
            }
        }
    }

    /// Run [`Self::sweep`] on `interval` until `cancel` fires.
    pub async fn run_sweeper(self, interval: Duration, timeout: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep(timeout).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_session_is_not_inactive() {
        let session = Session::new("s1");
        assert!(!session.is_inactive(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn sweep_removes_stale_sessions() {
        let store = SessionStore::new();
        let session = Session::new("stale");
        // Force staleness by touching then waiting past a zero timeout.
        session.touch().await;
        store.insert(session).await;
        store.sweep(Duration::from_secs(0)).await;
        assert!(store.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn request_interrupt_cancels_in_flight_tasks() {
        let session = Session::new("s1");
        let llm_token = session.begin_llm_task().await;
        let tts_token = session.begin_tts_task().await;
        session.request_interrupt().await;
        assert!(llm_token.is_cancelled());
        assert!(tts_token.is_cancelled());
        assert!(session.is_interrupted());
    }

    #[tokio::test]
    async fn request_interrupt_drains_both_queues() {
        let session = Session::new("s1");
        session.push_llm_in("stale transcript".to_string()).await;
        session.push_tts_in("stale sentence".to_string()).await;

        session.request_interrupt().await;

        let mut llm_rx = session.llm_in_rx.lock().await;
        assert!(matches!(llm_rx.try_recv(), Err(TryRecvError::Empty)));
        drop(llm_rx);
        let mut tts_rx = session.tts_in_rx.lock().await;
        assert!(matches!(tts_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn clear_interrupt_allows_further_generations() {
        let session = Session::new("s1");
        session.request_interrupt().await;
        assert!(session.is_interrupted());
        session.clear_interrupt();
        assert!(!session.is_interrupted());
    }
}
