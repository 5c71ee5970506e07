//! The central per-session state machine: three worker loops (ASR/LLM/TTS)
//! joined by bounded queues, a one-slot TTS latch, and the cancellation
//! cascade that implements barge-in.
//!
//! Grounded on `PipelineHandler` (original source) for queue-handoff
//! semantics and on the teacher's actor/state-machine shape
//! (`VoicePipeline`). Exactly one `tts_end` (and `tts_start`/`tts_stop`) is
//! emitted per utterance: the TTS adapter's event sink is wired directly to
//! this orchestrator's outbound channel, so there is structurally no
//! duplicate — see `DESIGN.md` open question (c).

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::adapters::asr::AsrEvent;
use crate::adapters::tts::TtsEvent;
use crate::adapters::{AsrAdapter, LlmAdapter, TtsAdapter};
use crate::events::ServerEvent;
use crate::session::Session;
use crate::text::segment_sentences;

/// Where the orchestrator sends client-facing output: JSON events and raw
/// PCM audio frames are logically one outbound stream but travel on two
/// channels since one is text and the other binary.
#[derive(Clone)]
pub struct Outbound {
    pub events: mpsc::Sender<ServerEvent>,
    pub audio: mpsc::Sender<Vec<u8>>,
}

impl Outbound {
    async fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Handles to the three worker tasks, so the connection handler can cancel
/// and join them on teardown.
pub struct PipelineHandles {
    pub asr: tokio::task::JoinHandle<()>,
    pub llm: tokio::task::JoinHandle<()>,
    pub tts: tokio::task::JoinHandle<()>,
}

impl PipelineHandles {
    pub fn abort_all(&self) {
        self.asr.abort();
        self.llm.abort();
        self.tts.abort();
    }
}

/// The three-stage queue machine described in spec §4.7. Stateless itself —
/// all mutable state lives on [`Session`]; `spawn` is the only entry point.
pub struct PipelineOrchestrator;

impl PipelineOrchestrator {
    /// Spawn the three worker loops for one session. `asr_events` is the
    /// receiver half bound to the session's [`AsrAdapter`]; the LLM and TTS
    /// workers pull from the session's own collapsed handoff queue and
    /// sentence queue via [`Session::next_llm_in`]/[`Session::next_tts_in`].
    pub fn spawn(
        session: Arc<Session>,
        asr_events: mpsc::Receiver<AsrEvent>,
        llm_adapter: Arc<dyn LlmAdapter>,
        tts_adapter: Arc<dyn TtsAdapter>,
        system_prompt: Option<String>,
        outbound: Outbound,
    ) -> PipelineHandles {
        spawn_workers(
            session,
            asr_events,
            llm_adapter,
            tts_adapter,
            system_prompt,
            outbound,
        )
    }
}

fn spawn_workers(
    session: Arc<Session>,
    mut asr_events: mpsc::Receiver<AsrEvent>,
    llm_adapter: Arc<dyn LlmAdapter>,
    tts_adapter: Arc<dyn TtsAdapter>,
    system_prompt: Option<String>,
    outbound: Outbound,
) -> PipelineHandles {
    let asr = {
        let session = session.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => break,
                    maybe = asr_events.recv() => {
                        match maybe {
                            None => break,
                            Some(event) => asr_worker_step(&session, &outbound, event).await,
                        }
                    }
                }
            }
        })
    };

    let llm = {
        let session = session.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => break,
                    maybe = session.next_llm_in() => {
                        match maybe {
                            None => break,
                            Some(prompt) => {
                                let token = session.begin_llm_task().await;
                                tokio::spawn(run_llm_generation(
                                    session.clone(),
                                    llm_adapter.clone(),
                                    outbound.clone(),
                                    prompt,
                                    system_prompt.clone(),
                                    token,
                                ));
                            }
                        }
                    }
                }
            }
        })
    };

    let tts = {
        let session = session.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let latch = Arc::new(Semaphore::new(1));
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => break,
                    maybe = session.next_tts_in() => {
                        match maybe {
                            None => break,
                            Some(sentence) => {
                                let Ok(permit) = latch.clone().acquire_owned().await else { break };
                                let token = session.begin_tts_task().await;
                                let is_first = session.take_first_sentence_flag();
                                tokio::spawn(run_tts_synthesis(
                                    session.clone(),
                                    tts_adapter.clone(),
                                    outbound.clone(),
                                    sentence,
                                    is_first,
                                    token,
                                    permit,
                                ));
                            }
                        }
                    }
                }
            }
        })
    };

    PipelineHandles { asr, llm, tts }
}

async fn asr_worker_step(session: &Arc<Session>, outbound: &Outbound, event: AsrEvent) {
    match event {
        AsrEvent::Partial(content) => {
            outbound
                .emit(ServerEvent::PartialTranscript {
                    session_id: session.id.clone(),
                    content,
                })
                .await;
        }
        AsrEvent::Final(content) => {
            // 1. Cancel any current TTS task and clear tts_in.
            session.cancel_tts_task().await;
            session.drain_tts_in().await;
            // 2. Emit tts_stop (terminates playback already in progress).
            outbound
                .emit(ServerEvent::TtsStop {
                    session_id: session.id.clone(),
                })
                .await;
            // 3. Admit this final: clear any interrupt left by a prior
            // barge-in before the reply it gates is pushed.
            session.clear_interrupt();
            // 4. Push the transcript onto llm_in (the collapsed queue).
            session.mark_new_utterance();
            session.push_llm_in(content).await;
        }
        AsrEvent::Error(message) => {
            outbound
                .emit(ServerEvent::Error {
                    session_id: session.id.clone(),
                    message,
                })
                .await;
        }
    }
}

/// Clears `llm_in_flight` on every exit path, including cancellation.
struct LlmFlagGuard(Arc<Session>);
impl Drop for LlmFlagGuard {
    fn drop(&mut self) {
        self.0.set_llm_in_flight(false);
    }
}

async fn run_llm_generation(
    session: Arc<Session>,
    adapter: Arc<dyn LlmAdapter>,
    outbound: Outbound,
    prompt: String,
    system_prompt: Option<String>,
    cancel: CancellationToken,
) {
    session.set_llm_in_flight(true);
    let _guard = LlmFlagGuard(session.clone());

    outbound
        .emit(ServerEvent::LlmStatus {
            session_id: session.id.clone(),
            status: "processing".to_string(),
        })
        .await;

    let mut stream = match adapter.generate(prompt, system_prompt, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            outbound
                .emit(ServerEvent::Error {
                    session_id: session.id.clone(),
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    let mut full = String::new();
    let mut subtitle = String::new();
    let mut sentence_buffer = String::new();

    loop {
        if session.is_interrupted() {
            return;
        }

        let chunk = {
            use futures_util::StreamExt;
            tokio::select! {
                () = cancel.cancelled() => return,
                item = stream.next() => item,
            }
        };

        let Some(chunk) = chunk else { break };
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                outbound
                    .emit(ServerEvent::Error {
                        session_id: session.id.clone(),
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        if session.is_interrupted() {
            return;
        }

        full.push_str(&chunk);
        subtitle.push_str(&chunk);
        let (complete, new_buffer) = segment_sentences(&chunk, &sentence_buffer);
        sentence_buffer = new_buffer;

        outbound
            .emit(ServerEvent::Subtitle {
                session_id: session.id.clone(),
                content: subtitle.clone(),
                is_complete: false,
            })
            .await;
        outbound
            .emit(ServerEvent::LlmResponse {
                session_id: session.id.clone(),
                content: full.clone(),
                is_complete: false,
            })
            .await;

        for sentence in complete {
            outbound
                .emit(ServerEvent::Subtitle {
                    session_id: session.id.clone(),
                    content: sentence.clone(),
                    is_complete: true,
                })
                .await;
            session.push_tts_in(sentence).await;
        }
    }

    if !sentence_buffer.is_empty() && !session.is_interrupted() {
        outbound
            .emit(ServerEvent::Subtitle {
                session_id: session.id.clone(),
                content: sentence_buffer.clone(),
                is_complete: true,
            })
            .await;
        session.push_tts_in(sentence_buffer.clone()).await;
    }

    outbound
        .emit(ServerEvent::LlmResponse {
            session_id: session.id.clone(),
            content: full,
            is_complete: true,
        })
        .await;
}

/// Clears `tts_in_flight` on every exit path, including cancellation, and
/// releases the latch permit by virtue of being dropped.
struct TtsFlagGuard {
    session: Arc<Session>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}
impl Drop for TtsFlagGuard {
    fn drop(&mut self) {
        self.session.set_tts_in_flight(false);
    }
}

async fn run_tts_synthesis(
    session: Arc<Session>,
    adapter: Arc<dyn TtsAdapter>,
    outbound: Outbound,
    sentence: String,
    is_first: bool,
    cancel: CancellationToken,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    session.set_tts_in_flight(true);
    let _guard = TtsFlagGuard {
        session: session.clone(),
        _permit: permit,
    };

    let (tts_tx, mut tts_rx) = mpsc::channel::<TtsEvent>(4);

    let forward = {
        let outbound = outbound.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move {
            while let Some(event) = tts_rx.recv().await {
                match event {
                    TtsEvent::Start { is_first } => {
                        outbound
                            .emit(ServerEvent::tts_start(session_id.clone(), is_first))
                            .await;
                    }
                    TtsEvent::Audio(bytes) => {
                        let _ = outbound.audio.send(bytes).await;
                    }
                    TtsEvent::End => {
                        outbound
                            .emit(ServerEvent::TtsEnd {
                                session_id: session_id.clone(),
                            })
                            .await;
                    }
                    TtsEvent::Stop => {
                        outbound
                            .emit(ServerEvent::TtsStop {
                                session_id: session_id.clone(),
                            })
                            .await;
                    }
                }
            }
        })
    };

    let session_for_check = session.clone();
    let interrupted: Arc<dyn Fn() -> bool + Send + Sync> =
        Arc::new(move || session_for_check.is_interrupted());

    if let Err(e) = adapter
        .synthesize(sentence, tts_tx, is_first, cancel, interrupted)
        .await
    {
        tracing::warn!(session_id = %session.id, error = %e, "tts synthesis failed");
    }

    let _ = forward.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::asr::EchoAsrAdapter;
    use crate::adapters::llm::LlmAdapter as _;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlm {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn generate(
            &self,
            _prompt: String,
            _system_prompt: Option<String>,
            _cancel: CancellationToken,
        ) -> Result<crate::adapters::llm::LlmStream, PipelineError> {
            let items: Vec<Result<String, PipelineError>> = self
                .chunks
                .iter()
                .map(|s| Ok((*s).to_string()))
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    struct RecordingTts {
        calls: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl TtsAdapter for RecordingTts {
        async fn synthesize(
            &self,
            text: String,
            sink: mpsc::Sender<TtsEvent>,
            is_first: bool,
            _cancel: CancellationToken,
            _interrupted: crate::adapters::tts::InterruptCheck,
        ) -> Result<(), PipelineError> {
            self.calls.lock().unwrap().push(text.clone());
            let _ = sink.send(TtsEvent::Start { is_first }).await;
            let _ = sink.send(TtsEvent::Audio(vec![0, 1, 2, 3])).await;
            let _ = sink.send(TtsEvent::End).await;
            Ok(())
        }

        async fn interrupt(&self) {}
    }

    #[tokio::test]
    async fn end_to_end_two_sentences_in_order() {
        let session = Session::new("s1");
        let (asr_tx, asr_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let (audio_tx, _audio_rx) = mpsc::channel(64);

        let llm = Arc::new(ScriptedLlm {
            chunks: vec!["Hi there. ", "How are you?"],
        });
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let tts = Arc::new(RecordingTts {
            calls: calls.clone(),
        });

        let handles = PipelineOrchestrator::spawn(
            session.clone(),
            asr_rx,
            llm,
            tts,
            None,
            Outbound {
                events: events_tx,
                audio: audio_tx,
            },
        );

        let _asr_adapter = EchoAsrAdapter::new();
        asr_tx.send(AsrEvent::Final("hello".into())).await.unwrap();

        // Drain a bounded number of events; enough for both sentences to
        // synthesize.
        let mut tts_starts = 0;
        for _ in 0..200 {
            if let Ok(Some(event)) =
                tokio::time::timeout(std::time::Duration::from_millis(50), events_rx.recv()).await
            {
                if matches!(event, ServerEvent::TtsStart { .. }) {
                    tts_starts += 1;
                }
                if tts_starts == 2 {
                    break;
                }
            } else {
                break;
            }
        }

        assert_eq!(tts_starts, 2);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &["Hi there.".to_string(), "How are you?".to_string()]
        );

        handles.abort_all();
    }
}
