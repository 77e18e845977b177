//! TOML configuration file loading
//!
//! Supports `~/.config/aria/relay/config.toml` as a persistent config
//! source. All fields are optional — the file is a partial overlay on
//! top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AriaConfigFile {
    /// Server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Endpoint detector tuning
    #[serde(default)]
    pub endpoint: EndpointFileConfig,

    /// Synthesis unit cut policy
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,

    /// Pipeline buffers and deadlines
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Provider model selection
    #[serde(default)]
    pub providers: ProvidersFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Persona overrides
    #[serde(default)]
    pub persona: PersonaFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Listen port
    pub port: Option<u16>,

    /// Static files directory (web client)
    pub static_dir: Option<String>,
}

/// Endpoint detector tuning
#[derive(Debug, Default, Deserialize)]
pub struct EndpointFileConfig {
    /// RMS energy above which a frame counts as voiced
    pub energy_threshold: Option<f32>,

    /// Voiced dwell before speech start, in milliseconds
    pub start_dwell_ms: Option<u64>,

    /// Silent dwell before speech end, in milliseconds
    pub end_dwell_ms: Option<u64>,

    /// Hard cap on utterance length, in milliseconds
    pub max_utterance_ms: Option<u64>,

    /// Inbound sample rate
    pub sample_rate: Option<u32>,
}

/// Synthesis unit cut policy
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Minimum characters before a sentence boundary cuts a unit
    pub min_sentence_chars: Option<usize>,

    /// Minimum characters before a clause boundary cuts a unit
    pub min_clause_chars: Option<usize>,

    /// Hard cap on unit length in characters
    pub max_unit_chars: Option<usize>,
}

/// Pipeline buffers and deadlines
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Transport → pipeline input queue depth
    pub input_buffer: Option<usize>,

    /// Pipeline → transport event queue depth
    pub event_buffer: Option<usize>,

    /// Generation → synthesis token queue depth
    pub token_buffer: Option<usize>,

    /// Synthesis → provider unit queue depth
    pub unit_buffer: Option<usize>,

    /// STT deadline in milliseconds
    pub transcribe_timeout_ms: Option<u64>,

    /// Token stream deadline in milliseconds
    pub generate_timeout_ms: Option<u64>,

    /// Synthesis window deadline in milliseconds
    pub synthesize_timeout_ms: Option<u64>,
}

/// Provider model selection
#[derive(Debug, Default, Deserialize)]
pub struct ProvidersFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Chat model (e.g. "gpt-4-turbo-preview")
    pub llm_model: Option<String>,

    /// Completion token cap; omitted means provider default
    pub llm_max_tokens: Option<u32>,

    /// `OpenAI` TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// `OpenAI` TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: Option<f32>,

    /// `ElevenLabs` voice identifier
    pub elevenlabs_voice_id: Option<String>,

    /// `ElevenLabs` model identifier
    pub elevenlabs_model: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Persona overrides
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    /// Assistant name
    pub name: Option<String>,

    /// Full system prompt override
    pub system_prompt: Option<String>,
}

/// Read and parse a specific TOML config file
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_config_file(path: &Path) -> Result<AriaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `AriaConfigFile::default()` if the file doesn't exist or
/// can't be parsed.
#[must_use]
pub fn load_config_file() -> AriaConfigFile {
    let Some(path) = config_file_path() else {
        return AriaConfigFile::default();
    };

    if !path.exists() {
        return AriaConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            AriaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/aria/relay/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aria").join("relay").join("config.toml"))
}
