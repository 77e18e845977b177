//! Configuration management for the Aria relay
//!
//! Resolution order per field: environment variable, then the optional
//! TOML config file, then the built-in default. Explicit CLI flags are
//! applied by the binary on top of the result.

pub mod file;

use std::path::{Path, PathBuf};

use crate::audio::EndpointConfig;
use crate::pipeline::{PipelineConfig, UnitPolicy};
use crate::{Error, Result};

/// Built-in persona prompt used when neither the config file nor the
/// environment overrides it
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Aria, a highly capable, disciplined, and efficient voice assistant. \
Your tone is calm, authoritative, and concise. You do not use filler words. \
You prioritize execution over conversation: when asked for a task, confirm it briefly and do it. \
Keep responses under two sentences unless a detailed explanation is requested.";

/// Aria relay configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Endpoint detector tuning
    pub endpoint: EndpointConfig,

    /// Synthesis unit cut policy
    pub synthesis: UnitPolicy,

    /// Pipeline buffers and deadlines
    pub pipeline: PipelineConfig,

    /// Provider model selection
    pub providers: ProviderConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Persona identity and prompt
    pub persona: PersonaConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web client)
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: None,
        }
    }
}

/// Provider model selection
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// Chat model (e.g. "gpt-4-turbo-preview")
    pub llm_model: String,

    /// Completion token cap; `None` leaves it to the provider
    pub llm_max_tokens: Option<u32>,

    /// `OpenAI` TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// `OpenAI` TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// `ElevenLabs` voice identifier, used when an `ElevenLabs` key is
    /// configured
    pub elevenlabs_voice_id: String,

    /// `ElevenLabs` model identifier
    pub elevenlabs_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            llm_model: "gpt-4-turbo-preview".to_string(),
            llm_max_tokens: None,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            elevenlabs_model: "eleven_monolingual_v1".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (preferred TTS when present)
    pub elevenlabs: Option<String>,
}

/// Persona identity and prompt
#[derive(Debug, Clone)]
pub struct PersonaConfig {
    /// Assistant name, used in logs and the web client
    pub name: String,

    /// System prompt seeded into every conversation
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Aria".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist and parse; without one
    /// the standard path is tried and silently skipped when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an explicitly given file cannot be
    /// loaded.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = match config_path {
            Some(path) => file::read_config_file(path)
                .map_err(|e| Error::Config(format!("cannot load {}: {e}", path.display())))?,
            None => file::load_config_file(),
        };
        Ok(Self::resolve(fc))
    }

    /// Merge file overlay and environment onto defaults
    fn resolve(fc: file::AriaConfigFile) -> Self {
        let defaults = Self::default();

        let server = ServerConfig {
            port: std::env::var("ARIA_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(defaults.server.port),
            static_dir: std::env::var("ARIA_STATIC_DIR")
                .ok()
                .map(PathBuf::from)
                .or_else(|| fc.server.static_dir.map(PathBuf::from)),
        };

        let endpoint = EndpointConfig {
            energy_threshold: fc
                .endpoint
                .energy_threshold
                .unwrap_or(defaults.endpoint.energy_threshold),
            start_dwell_ms: fc
                .endpoint
                .start_dwell_ms
                .unwrap_or(defaults.endpoint.start_dwell_ms),
            end_dwell_ms: fc
                .endpoint
                .end_dwell_ms
                .unwrap_or(defaults.endpoint.end_dwell_ms),
            max_utterance_ms: fc
                .endpoint
                .max_utterance_ms
                .unwrap_or(defaults.endpoint.max_utterance_ms),
            sample_rate: fc
                .endpoint
                .sample_rate
                .unwrap_or(defaults.endpoint.sample_rate),
        };

        let synthesis = UnitPolicy {
            min_sentence_chars: fc
                .synthesis
                .min_sentence_chars
                .unwrap_or(defaults.synthesis.min_sentence_chars),
            min_clause_chars: fc
                .synthesis
                .min_clause_chars
                .unwrap_or(defaults.synthesis.min_clause_chars),
            max_unit_chars: fc
                .synthesis
                .max_unit_chars
                .unwrap_or(defaults.synthesis.max_unit_chars),
        };

        let pipeline = PipelineConfig {
            input_buffer: fc
                .pipeline
                .input_buffer
                .unwrap_or(defaults.pipeline.input_buffer),
            event_buffer: fc
                .pipeline
                .event_buffer
                .unwrap_or(defaults.pipeline.event_buffer),
            token_buffer: fc
                .pipeline
                .token_buffer
                .unwrap_or(defaults.pipeline.token_buffer),
            unit_buffer: fc
                .pipeline
                .unit_buffer
                .unwrap_or(defaults.pipeline.unit_buffer),
            transcribe_timeout_ms: fc
                .pipeline
                .transcribe_timeout_ms
                .unwrap_or(defaults.pipeline.transcribe_timeout_ms),
            generate_timeout_ms: fc
                .pipeline
                .generate_timeout_ms
                .unwrap_or(defaults.pipeline.generate_timeout_ms),
            synthesize_timeout_ms: fc
                .pipeline
                .synthesize_timeout_ms
                .unwrap_or(defaults.pipeline.synthesize_timeout_ms),
        };

        let providers = ProviderConfig {
            stt_model: std::env::var("ARIA_STT_MODEL")
                .ok()
                .or(fc.providers.stt_model)
                .unwrap_or(defaults.providers.stt_model),
            llm_model: std::env::var("ARIA_LLM_MODEL")
                .ok()
                .or(fc.providers.llm_model)
                .unwrap_or(defaults.providers.llm_model),
            llm_max_tokens: std::env::var("ARIA_LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.providers.llm_max_tokens),
            tts_model: std::env::var("ARIA_TTS_MODEL")
                .ok()
                .or(fc.providers.tts_model)
                .unwrap_or(defaults.providers.tts_model),
            tts_voice: std::env::var("ARIA_TTS_VOICE")
                .ok()
                .or(fc.providers.tts_voice)
                .unwrap_or(defaults.providers.tts_voice),
            tts_speed: fc
                .providers
                .tts_speed
                .unwrap_or(defaults.providers.tts_speed),
            elevenlabs_voice_id: std::env::var("ELEVENLABS_VOICE_ID")
                .ok()
                .or(fc.providers.elevenlabs_voice_id)
                .unwrap_or(defaults.providers.elevenlabs_voice_id),
            elevenlabs_model: fc
                .providers
                .elevenlabs_model
                .unwrap_or(defaults.providers.elevenlabs_model),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .or(fc.api_keys.elevenlabs),
        };

        let persona = PersonaConfig {
            name: fc.persona.name.unwrap_or(defaults.persona.name),
            system_prompt: std::env::var("ARIA_SYSTEM_PROMPT")
                .ok()
                .or(fc.persona.system_prompt)
                .unwrap_or(defaults.persona.system_prompt),
        };

        Self {
            server,
            endpoint,
            synthesis,
            pipeline,
            providers,
            api_keys,
            persona,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.providers.stt_model, "whisper-1");
        assert_eq!(config.providers.llm_model, "gpt-4-turbo-preview");
        assert!(config.providers.llm_max_tokens.is_none());
        assert_eq!(config.persona.name, "Aria");
        assert!(config.persona.system_prompt.contains("Aria"));
        // timeout attribution relies on this ordering
        assert!(config.pipeline.synthesize_timeout_ms > config.pipeline.generate_timeout_ms);
    }

    #[test]
    fn file_overlay_wins_over_defaults() {
        let fc: file::AriaConfigFile = toml::from_str(
            r#"
            [endpoint]
            end_dwell_ms = 450

            [synthesis]
            min_sentence_chars = 12

            [persona]
            name = "Nova"
            "#,
        )
        .unwrap();

        let config = Config::resolve(fc);
        assert_eq!(config.endpoint.end_dwell_ms, 450);
        assert_eq!(config.synthesis.min_sentence_chars, 12);
        assert_eq!(config.persona.name, "Nova");
        // untouched sections keep their defaults
        assert_eq!(config.endpoint.start_dwell_ms, 150);
        assert_eq!(config.synthesis.max_unit_chars, 240);
    }

    #[test]
    fn explicit_missing_config_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
