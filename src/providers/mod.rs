//! External provider capability interfaces
//!
//! The pipeline consumes STT, LLM and TTS through these narrow traits;
//! concrete providers live in the submodules. Clients are built once at
//! startup and shared read-only across connections.

mod elevenlabs;
mod openai;

pub use elevenlabs::ElevenLabsTts;
pub use openai::{OpenAiChat, OpenAiStt, OpenAiTts};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::audio::AudioFormat;
use crate::history::ChatMessage;
use crate::Result;

/// Lazy stream of text increments in model order
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Lazy stream of finalized text units awaiting synthesis
pub type TextUnitStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Lazy stream of synthesized audio increments in unit order
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Converts one utterance of audio into text
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe raw PCM16 audio
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TranscriptionFailed`] on provider or
    /// network failure.
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<String>;
}

/// Streams a completion for the conversation so far
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a token stream for `prompt` against the given history.
    ///
    /// Increments arrive in exact model order. Dropping the stream
    /// releases the provider-side connection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GenerationFailed`] if the stream cannot be
    /// opened; stream items carry the same error for mid-stream failures.
    async fn stream_completion(
        &self,
        history: &[ChatMessage],
        prompt: &str,
    ) -> Result<TextStream>;
}

/// The three capabilities a connection needs, behind shared handles
#[derive(Clone)]
pub struct ProviderSet {
    /// Speech-to-text provider
    pub stt: Arc<dyn SpeechToText>,
    /// Language model provider
    pub llm: Arc<dyn LanguageModel>,
    /// Text-to-speech provider
    pub tts: Arc<dyn TextToSpeech>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet").finish_non_exhaustive()
    }
}

/// Converts a live stream of text units into a live stream of audio
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Open a synthesis stream over `units`.
    ///
    /// Audio increments come back in unit order. Closing the unit stream
    /// finishes any in-flight unit and then ends the audio stream; an
    /// item-level [`crate::Error::SynthesisFailed`] aborts the remainder.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SynthesisFailed`] if the stream cannot be
    /// opened.
    async fn stream_synthesis(&self, units: TextUnitStream) -> Result<AudioStream>;
}
