//! Per-connection lifecycle: accepts one WebSocket, demultiplexes inbound
//! audio vs. control commands, emits outbound events and audio.
//!
//! Grounded on `handle_audio_ws`/`audio_ws` (split-socket dual-task,
//! `tokio::select!` teardown) for the transport shape, and on the original
//! source's `WebSocketHandler` for the exact command routing table.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use voicebridge_core::adapters::asr::AsrEvent;
use voicebridge_core::adapters::{AsrAdapter, EchoAsrAdapter, HttpTtsAdapter, OpenAiCompatibleLlm};
use voicebridge_core::audio::{parse_frame, EnergyVad};
use voicebridge_core::events::{ClientCommand, ServerEvent};
use voicebridge_core::{Outbound, PipelineOrchestrator, Session};

use crate::state::AppState;

/// `GET /ws` — WebSocket upgrade for one voice session.
pub async fn audio_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("session", id = %session_id);
    let _enter = span.enter();

    let session = Session::new(session_id.clone());
    state.sessions.insert(session.clone()).await;

    let (asr_tx, asr_rx) = mpsc::channel::<AsrEvent>(32);
    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(32);
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(32);

    let llm_adapter = Arc::new(OpenAiCompatibleLlm::new(
        state.config.llm_endpoint.clone(),
        state.config.llm_api_key.clone(),
        state.config.llm_model.clone(),
    ));
    let tts_adapter = Arc::new(HttpTtsAdapter::new(
        state.config.tts_endpoint.clone(),
        state.config.tts_voice.clone(),
    ));

    let handles = PipelineOrchestrator::spawn(
        session.clone(),
        asr_rx,
        llm_adapter,
        tts_adapter,
        state.config.system_prompt.clone(),
        Outbound {
            events: events_tx.clone(),
            audio: audio_tx,
        },
    );

    let mut asr_adapter: Arc<dyn AsrAdapter> = Arc::new(EchoAsrAdapter::new());
    asr_adapter.bind(asr_tx.clone(), session_id.clone()).await;
    if let Err(e) = asr_adapter.start().await {
        warn!(error = %e, "failed to start asr adapter");
    }
    let _ = events_tx
        .send(ServerEvent::Status {
            session_id: session_id.clone(),
            status: "listening".to_string(),
        })
        .await;

    info!("voice session opened");

    let (ws_sender, ws_receiver) = socket.split();

    // ── Egress: outbound events/audio → WebSocket frames, plus keepalive ──
    let keepalive_interval = state.config.keepalive_interval;
    let mut egress = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        let mut ticker = tokio::time::interval(keepalive_interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Some(bytes) = audio_rx.recv() => {
                    if ws_sender.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    // ── Ingest: binary audio / text commands → VAD, ASR, control routing ──
    let ingest_session = session.clone();
    let ingest_session_id = session_id.clone();
    let vad_energy_threshold = state.config.vad_energy_threshold;
    let mut ingest = tokio::spawn(async move {
        let session = ingest_session;
        let session_id = ingest_session_id;
        let mut ws_receiver = ws_receiver;
        let mut vad = EnergyVad::new(vad_energy_threshold);

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    session.touch().await;
                    let frame = match parse_frame(&data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "rejected audio frame");
                            continue;
                        }
                    };

                    vad.process_frame(&frame.pcm);
                    if vad.has_continuous_voice()
                        && (session.llm_in_flight() || session.tts_in_flight())
                    {
                        session.request_interrupt().await;
                        vad.reset();
                    }

                    asr_adapter.feed(&frame.pcm).await;
                }
                Ok(Message::Text(text)) => {
                    session.touch().await;
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(ClientCommand::Stop) => {
                            asr_adapter.stop().await;
                            session.request_interrupt().await;
                            let _ = events_tx
                                .send(ServerEvent::StopAcknowledged {
                                    session_id: session_id.clone(),
                                    message: "stopped".to_string(),
                                    queues_cleared: true,
                                })
                                .await;
                        }
                        Ok(ClientCommand::Start) => {
                            if let Err(e) = asr_adapter.start().await {
                                warn!(error = %e, "failed to restart asr adapter");
                            }
                        }
                        Ok(ClientCommand::Reset) => {
                            // Await the old adapter's stop completing rather
                            // than sleeping a fixed duration — at least as
                            // safe, with no magic delay. See DESIGN.md (d).
                            asr_adapter.stop().await;
                            let fresh: Arc<dyn AsrAdapter> = Arc::new(EchoAsrAdapter::new());
                            fresh.bind(asr_tx.clone(), session_id.clone()).await;
                            if let Err(e) = fresh.start().await {
                                warn!(error = %e, "failed to start asr adapter after reset");
                            }
                            asr_adapter = fresh;
                        }
                        Ok(ClientCommand::Interrupt) => {
                            session.request_interrupt().await;
                            let _ = events_tx
                                .send(ServerEvent::InterruptAcknowledged {
                                    session_id: session_id.clone(),
                                })
                                .await;
                        }
                        Err(_) => {
                            warn!(msg = %text, "unknown control command");
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }

        asr_adapter.stop().await;
    });

    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    handles.abort_all();
    session.cancel.cancel();
    state.sessions.remove(&session_id).await;

    info!("voice session closed");
}
