//! Environment-variable server configuration, validated eagerly at startup.
//!
//! Mirrors the original source's `config.py::Config` — provider selection,
//! per-provider endpoints/credentials, VAD threshold, session timeout, and
//! keepalive interval, all read from the environment with typed defaults.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    pub llm_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub system_prompt: Option<String>,

    pub tts_endpoint: String,
    pub tts_voice: String,

    pub vad_energy_threshold: f32,
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub keepalive_interval: Duration,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value,
        }),
    }
}

impl ServerConfig {
    /// Load configuration from the process environment, applying `.env`
    /// first (non-fatal if absent) exactly like the teacher's `dotenvy`
    /// usage.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port = env_parse("VOICEBRIDGE_PORT", 8088u16)?;
        let vad_energy_threshold = env_parse("VOICEBRIDGE_VAD_ENERGY_THRESHOLD", 0.05f32)?;
        let session_timeout_secs = env_parse("VOICEBRIDGE_SESSION_TIMEOUT", 600u64)?;
        let sweep_interval_secs = env_parse("VOICEBRIDGE_SWEEP_INTERVAL", 60u64)?;
        let keepalive_interval_secs = env_parse("VOICEBRIDGE_KEEPALIVE_INTERVAL", 30u64)?;

        let llm_endpoint = std::env::var("VOICEBRIDGE_LLM_ENDPOINT")
            .map_err(|_| ConfigError::Missing("VOICEBRIDGE_LLM_ENDPOINT".to_string()))?;
        let tts_endpoint = std::env::var("VOICEBRIDGE_TTS_ENDPOINT")
            .map_err(|_| ConfigError::Missing("VOICEBRIDGE_TTS_ENDPOINT".to_string()))?;

        Ok(Self {
            host: env_or("VOICEBRIDGE_HOST", "0.0.0.0"),
            port,
            llm_endpoint,
            llm_api_key: std::env::var("VOICEBRIDGE_LLM_API_KEY").ok(),
            llm_model: env_or("VOICEBRIDGE_LLM_MODEL", "gpt-4o-mini"),
            system_prompt: std::env::var("VOICEBRIDGE_SYSTEM_PROMPT").ok(),
            tts_endpoint,
            tts_voice: env_or("VOICEBRIDGE_TTS_VOICE", "default"),
            vad_energy_threshold,
            session_timeout: Duration::from_secs(session_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            keepalive_interval: Duration::from_secs(keepalive_interval_secs),
        })
    }

    /// A redacted view of this config, safe to log at startup. Mirrors the
    /// original source's `Config.get_service_config_masked`.
    #[must_use]
    pub fn debug_summary(&self) -> String {
        format!(
            "host={} port={} llm_endpoint={} llm_model={} llm_api_key={} tts_endpoint={} tts_voice={} vad_threshold={} session_timeout={}s",
            self.host,
            self.port,
            self.llm_endpoint,
            self.llm_model,
            mask(self.llm_api_key.as_deref()),
            self.tts_endpoint,
            self.tts_voice,
            self.vad_energy_threshold,
            self.session_timeout.as_secs(),
        )
    }
}

fn mask(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "***",
        _ => "(none)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_hides_present_secret() {
        assert_eq!(mask(Some("sk-abc123")), "***");
    }

    #[test]
    fn mask_reports_absence() {
        assert_eq!(mask(None), "(none)");
    }
}
