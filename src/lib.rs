//! Aria Relay - streaming voice assistant pipeline
//!
//! This library provides the core functionality for the Aria relay:
//! - Audio ingest and speech endpoint detection
//! - Turn pipeline (transcribe, generate, synthesize) with barge-in
//! - Streaming providers (`OpenAI` STT/LLM/TTS, `ElevenLabs` TTS)
//! - WebSocket transport for browser clients
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Browser Client                       │
//! │      microphone PCM  │  text input  │  interrupt    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ WebSocket
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Aria Relay                          │
//! │   Ingest  │  Endpointing  │  Turn Pipeline  │  API  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Providers                           │
//! │   Whisper STT  │  Chat LLM  │  OpenAI/ElevenLabs TTS│
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod pipeline;
pub mod providers;
pub mod turn;

pub use config::Config;
pub use error::{Error, Result};
pub use events::PipelineEvent;
pub use pipeline::{PipelineHandle, PipelineInput, TurnPipeline};
pub use turn::{Turn, TurnState};
