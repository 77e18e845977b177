//! Synthesis stage: batches live tokens into speakable units and relays audio

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{CancelSignal, TokenFeed};
use crate::events::{PipelineEvent, Status};
use crate::providers::{AudioStream, TextToSpeech, TextUnitStream};
use crate::turn::{SequenceCounter, Turn, TurnState};
use crate::{Error, Result};

/// When accumulated text is worth sending to the synthesizer.
///
/// Tokens arrive mid-word and mid-phrase; speaking them immediately
/// produces choppy audio, waiting for the full response wastes the
/// stream. Units are cut at sentence punctuation once a minimum length
/// is reached, at clause punctuation once a larger minimum is reached,
/// and unconditionally at a hard cap.
#[derive(Debug, Clone)]
pub struct UnitPolicy {
    /// Cut after `.`, `?` or `!` once pending text is at least this long
    pub min_sentence_chars: usize,
    /// Cut after `,`, `;` or `:` once pending text is at least this long
    pub min_clause_chars: usize,
    /// Cut regardless of punctuation past this length
    pub max_unit_chars: usize,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self {
            min_sentence_chars: 8,
            min_clause_chars: 40,
            max_unit_chars: 240,
        }
    }
}

impl UnitPolicy {
    /// Whether `pending` ends at a cut point
    #[must_use]
    pub fn boundary_reached(&self, pending: &str) -> bool {
        let trimmed = pending.trim_end();
        let Some(last) = trimmed.chars().last() else {
            return false;
        };
        let len = trimmed.chars().count();
        if len >= self.max_unit_chars {
            return true;
        }
        match last {
            '.' | '?' | '!' => len >= self.min_sentence_chars,
            ',' | ';' | ':' => len >= self.min_clause_chars,
            _ => false,
        }
    }
}

/// How the token feed into the stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedEnd {
    /// Feed delivered its done marker; every unit was dispatched
    Completed,
    /// Feed was cut short; undispatched text was dropped
    Canceled,
}

/// What came back out of the provider's audio stream
#[derive(Debug)]
pub(crate) struct RelayOutcome {
    pub chunks: u64,
    pub error: Option<Error>,
}

/// Speaks a turn's response while it is still being generated.
///
/// Two halves run concurrently: the unit builder consumes the token
/// feed and cuts it into units per [`UnitPolicy`], and the audio relay
/// forwards the provider's chunks as sequence-stamped events. On
/// cancellation the builder drops its partial buffer and closes the
/// unit channel; the relay then drains whatever the provider had
/// already committed, so the final decided unit is flushed and the
/// provider worker is known to be finished before the stage returns.
pub struct SynthesisStage {
    tts: Arc<dyn TextToSpeech>,
    policy: UnitPolicy,
    unit_buffer: usize,
}

impl SynthesisStage {
    /// Build the stage around a TTS provider and a cut policy
    #[must_use]
    pub fn new(tts: Arc<dyn TextToSpeech>, policy: UnitPolicy, unit_buffer: usize) -> Self {
        Self {
            tts,
            policy,
            unit_buffer,
        }
    }

    /// Run the stage to completion over one token feed.
    ///
    /// Returns only once the provider's audio stream is exhausted, so
    /// callers can treat the return as the stage's cancellation
    /// acknowledgment.
    ///
    /// # Errors
    ///
    /// [`Error::SynthesisFailed`] if the provider rejects the stream
    /// outright. Mid-stream failures are reported in [`RelayOutcome`]
    /// so the already-spoken prefix is not lost.
    pub(crate) async fn run(
        &self,
        turn: &mut Turn,
        tokens: mpsc::Receiver<TokenFeed>,
        events: &mpsc::Sender<PipelineEvent>,
        cancel: CancelSignal,
    ) -> Result<(FeedEnd, RelayOutcome)> {
        let (unit_tx, unit_rx) = mpsc::channel(self.unit_buffer);
        let units: TextUnitStream = Box::pin(ReceiverStream::new(unit_rx));
        let audio = self.tts.stream_synthesis(units).await?;

        let turn_id = turn.id;
        let builder = self.build_units(turn, tokens, unit_tx, cancel);
        let relay = Self::relay_audio(turn_id, audio, events);
        Ok(tokio::join!(builder, relay))
    }

    /// Cut the token feed into units and dispatch them to the provider.
    ///
    /// The unit sender is dropped on return, which is what tells the
    /// provider worker no more text is coming.
    async fn build_units(
        &self,
        turn: &mut Turn,
        mut tokens: mpsc::Receiver<TokenFeed>,
        units: mpsc::Sender<String>,
        mut cancel: CancelSignal,
    ) -> FeedEnd {
        let mut pending = String::new();

        loop {
            let item = tokio::select! {
                () = cancel.canceled() => {
                    tracing::debug!(turn = %turn.id, dropped = pending.len(), "synthesis canceled; dropping partial unit");
                    return FeedEnd::Canceled;
                }
                item = tokens.recv() => item,
            };

            match item {
                Some(TokenFeed::Token(token)) => {
                    if turn.state() == TurnState::Generating {
                        turn.advance(TurnState::Synthesizing);
                    }
                    pending.push_str(&token.text);
                    if self.policy.boundary_reached(&pending) {
                        let unit = std::mem::take(&mut pending).trim().to_string();
                        if unit.is_empty() {
                            continue;
                        }
                        // a decided unit is only committed once the worker accepts it
                        tokio::select! {
                            () = cancel.canceled() => return FeedEnd::Canceled,
                            sent = units.send(unit) => {
                                if sent.is_err() {
                                    return FeedEnd::Canceled;
                                }
                            }
                        }
                    }
                }
                Some(TokenFeed::Done) => {
                    let tail = pending.trim();
                    if !tail.is_empty() {
                        let _ = units.send(tail.to_string()).await;
                    }
                    return FeedEnd::Completed;
                }
                None => {
                    // feed closed without the done marker: upstream was cut
                    return FeedEnd::Canceled;
                }
            }
        }
    }

    /// Forward provider audio as sequence-stamped events until the
    /// stream ends
    async fn relay_audio(
        turn_id: Uuid,
        mut audio: AudioStream,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> RelayOutcome {
        let mut seqs = SequenceCounter::default();
        let mut speaking = false;

        while let Some(item) = audio.next().await {
            match item {
                Ok(bytes) => {
                    if !speaking {
                        speaking = true;
                        let _ = events.send(PipelineEvent::Status(Status::Speaking)).await;
                    }
                    let chunk = crate::turn::AudioChunk::new(seqs.issue(), bytes);
                    let event = PipelineEvent::Audio { turn_id, chunk };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    return RelayOutcome {
                        chunks: seqs.issued(),
                        error: Some(e),
                    };
                }
            }
        }

        RelayOutcome {
            chunks: seqs.issued(),
            error: None,
        }
    }
}
