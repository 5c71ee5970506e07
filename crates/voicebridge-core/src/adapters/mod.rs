//! Provider-agnostic contracts for the three external collaborators (speech
//! recognizer, text generator, speech synthesizer), plus one reference
//! implementation of each.

pub mod asr;
pub mod llm;
pub mod tts;

pub use asr::{AsrAdapter, AsrEvent, EchoAsrAdapter};
pub use llm::{LlmAdapter, OpenAiCompatibleLlm};
pub use tts::{TtsAdapter, TtsEvent, HttpTtsAdapter};
