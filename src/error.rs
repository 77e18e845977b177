//! Error types for the Aria relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Aria relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio decoding/encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// `append` was called with no open utterance
    #[error("no open utterance")]
    NoOpenUtterance,

    /// The utterance was sealed without any appended audio
    #[error("utterance is empty")]
    EmptyUtterance,

    /// `open` was called while an utterance was already open
    #[error("utterance already open")]
    UtteranceAlreadyOpen,

    /// Speech-to-text provider call failed
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Speech-to-text returned no recognizable speech
    #[error("empty transcript")]
    EmptyTranscript,

    /// Language model streaming call failed
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Text-to-speech provider call failed
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// A pipeline stage exceeded its configured deadline
    #[error("{stage} stage timed out after {timeout_ms}ms")]
    StageTimeout {
        /// Stage name ("transcription", "generation", "synthesis")
        stage: &'static str,
        /// Configured deadline in milliseconds
        timeout_ms: u64,
    },

    /// Input was sent to a pipeline whose task has already exited
    #[error("pipeline is no longer accepting input")]
    PipelineClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coarse error classification carried on wire events.
///
/// Clients see the kind plus a short detail string, never a raw provider
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Ingest misuse (open/append/seal contract violation)
    Ingest,
    /// STT provider failure
    Transcription,
    /// STT returned no recognizable speech
    EmptyTranscript,
    /// LLM provider failure
    Generation,
    /// TTS provider failure
    Synthesis,
    /// A stage deadline expired
    Timeout,
    /// Anything else (io, serialization, config)
    Internal,
}

impl Error {
    /// Map an error onto its wire-facing kind
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoOpenUtterance | Self::EmptyUtterance | Self::UtteranceAlreadyOpen => {
                ErrorKind::Ingest
            }
            Self::TranscriptionFailed(_) => ErrorKind::Transcription,
            Self::EmptyTranscript => ErrorKind::EmptyTranscript,
            Self::GenerationFailed(_) => ErrorKind::Generation,
            Self::SynthesisFailed(_) => ErrorKind::Synthesis,
            Self::StageTimeout { .. } => ErrorKind::Timeout,
            Self::Config(_)
            | Self::Audio(_)
            | Self::PipelineClosed
            | Self::Io(_)
            | Self::Http(_)
            | Self::Serialization(_)
            | Self::Toml(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_turn_level_failures() {
        assert_eq!(
            Error::TranscriptionFailed("503".into()).kind(),
            ErrorKind::Transcription
        );
        assert_eq!(Error::EmptyTranscript.kind(), ErrorKind::EmptyTranscript);
        assert_eq!(
            Error::GenerationFailed("reset".into()).kind(),
            ErrorKind::Generation
        );
        assert_eq!(
            Error::SynthesisFailed("429".into()).kind(),
            ErrorKind::Synthesis
        );
        assert_eq!(
            Error::StageTimeout { stage: "generation", timeout_ms: 100 }.kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn kind_maps_ingest_misuse() {
        assert_eq!(Error::NoOpenUtterance.kind(), ErrorKind::Ingest);
        assert_eq!(Error::EmptyUtterance.kind(), ErrorKind::Ingest);
        assert_eq!(Error::UtteranceAlreadyOpen.kind(), ErrorKind::Ingest);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::EmptyTranscript).unwrap();
        assert_eq!(json, "\"empty_transcript\"");
    }
}
