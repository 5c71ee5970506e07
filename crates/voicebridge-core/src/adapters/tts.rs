//! Speech synthesis adapter contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Connect/response cap for HTTP-backed TTS providers, per spec §5.
pub const DEFAULT_TTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Events a TTS adapter emits via its sink for one `synthesize` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsEvent {
    /// Metadata announcing the next audio payload.
    Start { is_first: bool },
    /// One contiguous PCM16LE mono 16kHz payload.
    Audio(Vec<u8>),
    /// The payload finished.
    End,
    /// Synthesis was cancelled or interrupted before completion; no audio
    /// was emitted for this call.
    Stop,
}

/// Returns whether the owning session's `interrupted` flag is currently
/// set. Checked both before enqueuing and before emission, per contract.
pub type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Abstract speech synthesizer.
///
/// Implementations may internally buffer chunks from a streaming backend,
/// but must expose exactly one concatenated audio payload per call — this
/// preserves the ordering invariant enforced by the pipeline's TTS latch.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    async fn synthesize(
        &self,
        text: String,
        sink: mpsc::Sender<TtsEvent>,
        is_first: bool,
        cancel: CancellationToken,
        interrupted: InterruptCheck,
    ) -> Result<(), PipelineError>;

    /// Cancel any pending or in-flight synthesis and clear the adapter's
    /// internal send queue, if it keeps one.
    async fn interrupt(&self);
}

/// An HTTP-backed [`TtsAdapter`] issuing one request per sentence and
/// buffering the streamed response body into a single payload before
/// handing it to the sink.
pub struct HttpTtsAdapter {
    client: reqwest::Client,
    endpoint: String,
    voice: String,
    current: Mutex<Option<CancellationToken>>,
}

impl HttpTtsAdapter {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, voice: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TTS_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            voice: voice.into(),
            current: Mutex::new(None),
        }
    }

    /// Encode `f32` samples in `[-1.0, 1.0]` to PCM16LE, mirroring the
    /// websocket audio plane's wire encoding.
    fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let sample = (clamped * f32::from(i16::MAX)) as i16;
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }
}

#[async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn synthesize(
        &self,
        text: String,
        sink: mpsc::Sender<TtsEvent>,
        is_first: bool,
        cancel: CancellationToken,
        interrupted: InterruptCheck,
    ) -> Result<(), PipelineError> {
        {
            *self.current.lock().await = Some(cancel.clone());
        }

        if interrupted() || cancel.is_cancelled() {
            let _ = sink.send(TtsEvent::Stop).await;
            return Ok(());
        }

        let _ = sink.send(TtsEvent::Start { is_first }).await;

        let request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text, "voice": self.voice }));

        let response = tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(TtsEvent::Stop).await;
                return Ok(());
            }
            result = request.send() => result.map_err(|e| PipelineError::AdapterRuntimeFailed(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(PipelineError::AdapterRuntimeFailed(format!(
                "tts endpoint returned {}",
                response.status()
            )));
        }

        let audio = tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(TtsEvent::Stop).await;
                return Ok(());
            }
            bytes = response.bytes() => bytes.map_err(|e| PipelineError::AdapterRuntimeFailed(e.to_string()))?,
        };

        if interrupted() || cancel.is_cancelled() {
            let _ = sink.send(TtsEvent::Stop).await;
            return Ok(());
        }

        let _ = sink.send(TtsEvent::Audio(audio.to_vec())).await;
        let _ = sink.send(TtsEvent::End).await;
        Ok(())
    }

    async fn interrupt(&self) {
        if let Some(token) = self.current.lock().await.take() {
            token.cancel();
        }
    }
}
