//! Turn lifecycle types and transport units

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::Utterance;

/// Turn state machine
///
/// `Listening → Transcribing → Generating → Synthesizing → Completed`,
/// with `Canceled` and `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Armed, waiting for an utterance or text input
    Listening,
    /// Awaiting the STT provider
    Transcribing,
    /// Streaming tokens from the LLM
    Generating,
    /// Generation and synthesis running concurrently
    Synthesizing,
    /// Success terminal: response fully generated and synthesized
    Completed,
    /// Terminal: user-initiated interrupt or barge-in
    Canceled,
    /// Terminal: a stage failed or timed out
    Failed,
}

impl TurnState {
    /// Whether this state ends the turn
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// Wire name of the state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

/// Input that starts a turn
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// A sealed utterance from the endpoint detector
    Voice(Utterance),
    /// Direct text, bypassing ingest and transcription
    Text(String),
}

/// One generated text increment, sequence-numbered within its turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToken {
    /// Position in the turn's token stream, starting at 0
    pub seq: u64,
    /// Opaque text increment in model order
    pub text: String,
}

impl TextToken {
    /// Build a token
    #[must_use]
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }
}

/// One synthesized audio increment, sequence-numbered within its turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position in the turn's audio stream, starting at 0
    pub seq: u64,
    /// Encoded audio bytes from the TTS provider
    pub audio: Vec<u8>,
}

impl AudioChunk {
    /// Build a chunk
    #[must_use]
    pub const fn new(seq: u64, audio: Vec<u8>) -> Self {
        Self { seq, audio }
    }
}

/// Strictly increasing per-turn sequence numbers, never reused
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    /// Take the next sequence number
    pub const fn issue(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// How many numbers have been issued so far
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.next
    }
}

/// One request/response cycle
#[derive(Debug)]
pub struct Turn {
    /// Unique turn identifier
    pub id: Uuid,
    state: TurnState,
    transcript: String,
    response: String,
    started_at: DateTime<Utc>,
}

impl Turn {
    /// Start a new turn in `Listening`
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TurnState::Listening,
            transcript: String::new(),
            response: String::new(),
            started_at: Utc::now(),
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Move to the next state, logging the transition
    pub fn advance(&mut self, next: TurnState) {
        tracing::debug!(
            turn = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "turn state"
        );
        self.state = next;
    }

    /// Record the finalized transcript
    pub fn set_transcript(&mut self, text: impl Into<String>) {
        self.transcript = text.into();
    }

    /// The finalized transcript (empty until transcription completes)
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Record the full response text once generation finished
    pub fn set_response(&mut self, text: impl Into<String>) {
        self.response = text.into();
    }

    /// Accumulated response text
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Milliseconds elapsed since the turn started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        let millis = Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds();
        u64::try_from(millis).unwrap_or(0)
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TurnState::Completed.is_terminal());
        assert!(TurnState::Canceled.is_terminal());
        assert!(TurnState::Failed.is_terminal());
        assert!(!TurnState::Listening.is_terminal());
        assert!(!TurnState::Transcribing.is_terminal());
        assert!(!TurnState::Generating.is_terminal());
        assert!(!TurnState::Synthesizing.is_terminal());
    }

    #[test]
    fn sequence_counter_is_strictly_increasing_without_gaps() {
        let mut counter = SequenceCounter::default();
        let seqs: Vec<u64> = (0..5).map(|_| counter.issue()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn turn_starts_listening_with_unique_id() {
        let a = Turn::new();
        let b = Turn::new();
        assert_eq!(a.state(), TurnState::Listening);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn advance_tracks_state() {
        let mut turn = Turn::new();
        turn.advance(TurnState::Transcribing);
        turn.advance(TurnState::Generating);
        turn.advance(TurnState::Synthesizing);
        turn.advance(TurnState::Completed);
        assert_eq!(turn.state(), TurnState::Completed);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&TurnState::Synthesizing).unwrap();
        assert_eq!(json, "\"synthesizing\"");
    }
}
