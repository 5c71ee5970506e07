//! Transport-agnostic core of the realtime voice-to-voice assistant server:
//! session registry, audio frame/VAD, text segmenter, ASR/LLM/TTS adapter
//! contracts, and the pipeline orchestrator.

pub mod adapters;
pub mod audio;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod session;
pub mod text;

pub use error::{FrameError, PipelineError};
pub use events::{ClientCommand, ServerEvent};
pub use pipeline::{Outbound, PipelineHandles, PipelineOrchestrator};
pub use session::{Session, SessionStore};
