//! Generation stage: streams model tokens toward the client and the synthesizer

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::{CancelSignal, StageExit, TokenFeed};
use crate::events::PipelineEvent;
use crate::history::ChatMessage;
use crate::providers::LanguageModel;
use crate::turn::{SequenceCounter, TextToken};
use crate::{Error, Result};

/// Drives one model completion, fanning tokens out as they arrive.
///
/// Tokens are pulled from the provider one at a time; nothing is
/// requested ahead of what the consumers have accepted, so an interrupt
/// stops the stage at the next increment instead of after a prefetched
/// tail. Each token is stamped with a per-turn sequence number, emitted
/// as a [`PipelineEvent::Token`], and forwarded into the synthesis feed.
/// A [`TokenFeed::Done`] marker closes the feed only on natural
/// completion; cancellation and failure close the channel without it.
pub struct GenerationStage {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl GenerationStage {
    /// Build the stage around a language model and its deadline
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Stream one completion for `prompt` against `history`.
    ///
    /// Returns the concatenated response text on natural completion.
    /// The deadline spans the whole stream, not each increment.
    ///
    /// # Errors
    ///
    /// [`Error::GenerationFailed`] on provider failure and
    /// [`Error::StageTimeout`] past the deadline. Closed consumers are
    /// not errors; they mean the turn is being torn down, so the stage
    /// exits as canceled.
    pub async fn run(
        &self,
        turn_id: Uuid,
        history: Vec<ChatMessage>,
        prompt: String,
        tokens: mpsc::Sender<TokenFeed>,
        events: mpsc::Sender<PipelineEvent>,
        mut cancel: CancelSignal,
    ) -> Result<StageExit<String>> {
        if cancel.is_canceled() {
            return Ok(StageExit::Canceled);
        }
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut stream = tokio::select! {
            () = cancel.canceled() => return Ok(StageExit::Canceled),
            opened = self.llm.stream_completion(&history, &prompt) => opened?,
        };

        let mut seqs = SequenceCounter::default();
        let mut response = String::new();

        loop {
            tokio::select! {
                () = cancel.canceled() => {
                    tracing::debug!(turn = %turn_id, "generation canceled; closing provider stream");
                    return Ok(StageExit::Canceled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Err(Error::StageTimeout {
                        stage: "generation",
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                item = stream.next() => match item {
                    Some(Ok(text)) => {
                        let token = TextToken::new(seqs.issue(), text);
                        response.push_str(&token.text);

                        let event = PipelineEvent::Token {
                            turn_id,
                            token: token.clone(),
                        };
                        if events.send(event).await.is_err() {
                            return Ok(StageExit::Canceled);
                        }
                        if tokens.send(TokenFeed::Token(token)).await.is_err() {
                            return Ok(StageExit::Canceled);
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        // Done marker tells the synthesizer the tail is final
                        let _ = tokens.send(TokenFeed::Done).await;
                        tracing::debug!(turn = %turn_id, tokens = seqs.issued(), "generation complete");
                        return Ok(StageExit::Done(response));
                    }
                }
            }
        }
    }
}
