//! Pipeline error types.

/// Errors that can occur anywhere in the voice pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Startup configuration was invalid; the process should abort.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// An adapter (ASR/LLM/TTS) failed to initialize for a session.
    #[error("adapter init failed: {0}")]
    AdapterInitFailed(String),

    /// An adapter failed while running; the stage is cancelled but the
    /// session continues.
    #[error("adapter runtime failed: {0}")]
    AdapterRuntimeFailed(String),

    /// A stage exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The client disconnected; the session should terminate cleanly.
    #[error("client disconnected")]
    ClientDisconnected,

    /// Internal cancellation. Never surfaced to the client.
    #[error("operation cancelled")]
    Cancelled,

    /// A frame or message failed to parse.
    #[error("frame decode failed: {0}")]
    FrameError(#[from] FrameError),

    /// Transport-level send failure (socket closed, channel dropped).
    #[error("send failed: {0}")]
    SendFailed(String),

    /// IO error surfaced from an adapter.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an inbound binary audio frame was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    /// Frame shorter than the minimum header + PCM length.
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    /// PCM payload length is not a multiple of the sample size.
    #[error("truncated PCM payload: {len} trailing bytes")]
    TruncatedPcm { len: usize },
}
