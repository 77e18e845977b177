//! Transcription stage: sealed utterance in, finalized transcript out

use std::sync::Arc;
use std::time::Duration;

use super::{CancelSignal, StageExit};
use crate::audio::Utterance;
use crate::providers::SpeechToText;
use crate::{Error, Result};

/// Drives one utterance through the STT provider
pub struct TranscriptionStage {
    stt: Arc<dyn SpeechToText>,
    timeout: Duration,
}

impl TranscriptionStage {
    /// Build the stage around an STT provider and its deadline
    #[must_use]
    pub fn new(stt: Arc<dyn SpeechToText>, timeout: Duration) -> Self {
        Self { stt, timeout }
    }

    /// Transcribe one utterance.
    ///
    /// Suspends until the provider answers, the deadline expires, or the
    /// turn is canceled. A canceled await abandons the provider result:
    /// the in-flight request is dropped and nothing else happens.
    ///
    /// # Errors
    ///
    /// [`Error::TranscriptionFailed`] on provider failure,
    /// [`Error::EmptyTranscript`] if no recognizable speech came back,
    /// [`Error::StageTimeout`] past the deadline.
    pub async fn run(
        &self,
        utterance: &Utterance,
        cancel: &mut CancelSignal,
    ) -> Result<StageExit<String>> {
        tracing::debug!(
            bytes = utterance.audio.len(),
            duration_ms = utterance.duration_ms(),
            "transcribing utterance"
        );

        let call = self.stt.transcribe(&utterance.audio, utterance.format);

        tokio::select! {
            () = cancel.canceled() => {
                tracing::debug!("transcription canceled; abandoning provider result");
                Ok(StageExit::Canceled)
            }
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Err(_) => Err(Error::StageTimeout {
                    stage: "transcription",
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                Ok(Err(e)) => Err(e),
                Ok(Ok(text)) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        Err(Error::EmptyTranscript)
                    } else {
                        Ok(StageExit::Done(text))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;
    use crate::pipeline::cancel_pair;
    use async_trait::async_trait;

    struct FixedStt {
        reply: Result<String>,
        delay: Duration,
    }

    #[async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(Error::TranscriptionFailed("provider down".into())),
            }
        }
    }

    fn utterance() -> Utterance {
        Utterance {
            audio: vec![0; 3200],
            format: AudioFormat::default(),
        }
    }

    fn stage(reply: Result<String>, delay: Duration, timeout: Duration) -> TranscriptionStage {
        TranscriptionStage::new(Arc::new(FixedStt { reply, delay }), timeout)
    }

    #[tokio::test]
    async fn returns_trimmed_transcript() {
        let stage = stage(
            Ok("  turn on the lights  ".into()),
            Duration::ZERO,
            Duration::from_secs(1),
        );
        let (_handle, mut cancel) = cancel_pair();

        let exit = stage.run(&utterance(), &mut cancel).await.unwrap();
        assert!(matches!(exit, StageExit::Done(text) if text == "turn on the lights"));
    }

    #[tokio::test]
    async fn whitespace_only_is_empty_transcript() {
        let stage = stage(Ok("   ".into()), Duration::ZERO, Duration::from_secs(1));
        let (_handle, mut cancel) = cancel_pair();

        let result = stage.run(&utterance(), &mut cancel).await;
        assert!(matches!(result, Err(Error::EmptyTranscript)));
    }

    #[tokio::test]
    async fn provider_failure_passes_through() {
        let stage = stage(
            Err(Error::TranscriptionFailed(String::new())),
            Duration::ZERO,
            Duration::from_secs(1),
        );
        let (_handle, mut cancel) = cancel_pair();

        let result = stage.run(&utterance(), &mut cancel).await;
        assert!(matches!(result, Err(Error::TranscriptionFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_stage_timeout() {
        let stage = stage(
            Ok("late".into()),
            Duration::from_secs(30),
            Duration::from_millis(200),
        );
        let (_handle, mut cancel) = cancel_pair();

        let result = stage.run(&utterance(), &mut cancel).await;
        assert!(matches!(
            result,
            Err(Error::StageTimeout { stage: "transcription", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_abandons_inflight_call() {
        let stage = stage(
            Ok("never delivered".into()),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );
        let (handle, mut cancel) = cancel_pair();

        let run = tokio::spawn(async move {
            let utterance = Utterance {
                audio: vec![0; 320],
                format: AudioFormat::default(),
            };
            let stage = stage;
            stage.run(&utterance, &mut cancel).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.fire();

        let exit = run.await.unwrap().unwrap();
        assert!(matches!(exit, StageExit::Canceled));
    }
}
