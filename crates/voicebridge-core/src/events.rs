//! Outbound/inbound wire events for the voice connection.

use serde::{Deserialize, Serialize};

/// Events sent to the client. Every variant carries `session_id` so a
/// client multiplexing more than one connection can route by it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Interim ASR text, may be superseded.
    PartialTranscript { session_id: String, content: String },

    /// Finalized ASR text.
    FinalTranscript { session_id: String, content: String },

    /// ASR lifecycle: `listening` / `stopped`.
    Status { session_id: String, status: String },

    /// Rolling or complete LLM sentence.
    Subtitle {
        session_id: String,
        content: String,
        is_complete: bool,
    },

    /// Rolling or final full reply.
    LlmResponse {
        session_id: String,
        content: String,
        is_complete: bool,
    },

    /// LLM lifecycle, e.g. `processing`.
    LlmStatus { session_id: String, status: String },

    /// Announces the next audio payload.
    TtsStart {
        session_id: String,
        format: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_first: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// The current audio payload finished.
    TtsEnd { session_id: String },

    /// Discard audio currently playing.
    TtsStop { session_id: String },

    /// Reply to a `stop` command.
    StopAcknowledged {
        session_id: String,
        message: String,
        queues_cleared: bool,
    },

    /// Reply to an `interrupt` command.
    InterruptAcknowledged { session_id: String },

    /// Error surface.
    Error { session_id: String, message: String },
}

impl ServerEvent {
    #[must_use]
    pub fn tts_start(session_id: impl Into<String>, is_first: bool) -> Self {
        Self::TtsStart {
            session_id: session_id.into(),
            format: "pcm".to_string(),
            is_first: Some(is_first),
            text: None,
        }
    }
}

/// Inbound text-frame control commands.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Stop,
    Start,
    Reset,
    Interrupt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_serializes_with_type_tag() {
        let event = ServerEvent::FinalTranscript {
            session_id: "s1".into(),
            content: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "final_transcript");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn client_command_parses_unknown_as_error() {
        let result: Result<ClientCommand, _> = serde_json::from_str(r#"{"type":"wat"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn client_command_parses_known_types() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Stop);
    }
}
