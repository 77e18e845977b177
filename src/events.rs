//! Events the pipeline emits to the transport layer
//!
//! The transport (WebSocket today) converts these into its wire format.
//! Sequence numbers on token/audio events are strictly increasing per
//! turn, and every turn ends with exactly one [`PipelineEvent::TurnEnded`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::turn::{AudioChunk, TextToken, TurnState};
use crate::Error;

/// Coarse activity status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Armed and waiting for speech or text
    Listening,
    /// A turn is being transcribed or generated
    Thinking,
    /// Response audio is streaming
    Speaking,
    /// A turn just ended; the connection is about to re-arm
    Idle,
}

impl Status {
    /// Wire name of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Idle => "idle",
        }
    }
}

/// Outbound pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Activity status changed
    Status(Status),
    /// The user's utterance was transcribed (or direct text accepted)
    Transcript {
        /// Owning turn
        turn_id: Uuid,
        /// Finalized user text
        text: String,
    },
    /// One generated text increment
    Token {
        /// Owning turn
        turn_id: Uuid,
        /// Sequence-numbered increment
        token: TextToken,
    },
    /// One synthesized audio increment
    Audio {
        /// Owning turn
        turn_id: Uuid,
        /// Sequence-numbered chunk
        chunk: AudioChunk,
    },
    /// A stage failed; the turn is about to end `Failed`
    Error {
        /// Owning turn, when the failure happened inside one
        turn_id: Option<Uuid>,
        /// Typed classification (never a raw provider error)
        kind: ErrorKind,
        /// Short human-readable detail
        detail: String,
    },
    /// The turn reached a terminal state. Emitted exactly once per turn;
    /// nothing for that turn follows it. Doubles as the explicit
    /// abort/stream-end marker.
    TurnEnded {
        /// The turn that ended
        turn_id: Uuid,
        /// `Completed`, `Canceled` or `Failed`
        state: TurnState,
        /// Wall time from turn start to terminal state
        duration_ms: u64,
    },
}

impl PipelineEvent {
    /// Build an error event from a stage failure
    #[must_use]
    pub fn from_error(turn_id: Option<Uuid>, error: &Error) -> Self {
        Self::Error {
            turn_id,
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}
