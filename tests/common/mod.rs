//! Shared test utilities: scripted providers and PCM frame generators

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use aria_relay::audio::AudioFormat;
use aria_relay::config::Config;
use aria_relay::events::PipelineEvent;
use aria_relay::history::ChatMessage;
use aria_relay::providers::{
    AudioStream, LanguageModel, ProviderSet, SpeechToText, TextStream, TextToSpeech,
    TextUnitStream,
};
use aria_relay::{PipelineHandle, TurnPipeline};

/// Speech-to-text fake returning a scripted transcript
pub struct ScriptedStt {
    pub reply: &'static str,
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> aria_relay::Result<String> {
        Ok(self.reply.to_string())
    }
}

/// Speech-to-text fake that always fails
pub struct FailingStt;

#[async_trait]
impl SpeechToText for FailingStt {
    async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> aria_relay::Result<String> {
        Err(aria_relay::Error::TranscriptionFailed(
            "recognizer offline".to_string(),
        ))
    }
}

/// One language model call script
pub enum LlmScript {
    /// Stream these tokens, then end normally
    Finish(Vec<&'static str>),
    /// Stream these tokens, then stall until the turn is torn down
    Stall(Vec<&'static str>),
}

/// Language model fake: each call pops the next script and records the
/// history and prompt it was given
pub struct QueueLlm {
    scripts: Mutex<VecDeque<LlmScript>>,
    pub seen: Mutex<Vec<(Vec<ChatMessage>, String)>>,
}

impl QueueLlm {
    #[must_use]
    pub fn new(scripts: Vec<LlmScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LanguageModel for QueueLlm {
    async fn stream_completion(
        &self,
        history: &[ChatMessage],
        prompt: &str,
    ) -> aria_relay::Result<TextStream> {
        self.seen
            .lock()
            .unwrap()
            .push((history.to_vec(), prompt.to_string()));

        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(LlmScript::Finish(tokens)) => {
                let items: Vec<aria_relay::Result<String>> =
                    tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(LlmScript::Stall(tokens)) => {
                let items: Vec<aria_relay::Result<String>> =
                    tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                Ok(Box::pin(
                    futures::stream::iter(items).chain(futures::stream::pending()),
                ))
            }
            None => Err(aria_relay::Error::GenerationFailed(
                "script exhausted".to_string(),
            )),
        }
    }
}

/// Text-to-speech fake emitting each unit's bytes as one audio chunk
pub struct EchoTts;

#[async_trait]
impl TextToSpeech for EchoTts {
    async fn stream_synthesis(&self, units: TextUnitStream) -> aria_relay::Result<AudioStream> {
        Ok(Box::pin(units.map(|unit| Ok(unit.into_bytes()))))
    }
}

/// One frame of loud PCM16 speech (square wave, little endian)
#[must_use]
pub fn speech_frame(samples: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let value: i16 = if i % 2 == 0 { 8000 } else { -8000 };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// One frame of PCM16 silence
#[must_use]
pub fn silence_frame(samples: usize) -> Vec<u8> {
    vec![0; samples * 2]
}

/// Spawn a pipeline wired to the given providers with default tuning
pub fn spawn_pipeline(
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
) -> (PipelineHandle, mpsc::Receiver<PipelineEvent>) {
    let providers = ProviderSet { stt, llm, tts };
    TurnPipeline::new(providers, &Config::default()).spawn()
}

/// Receive one event, panicking if nothing arrives in time
pub async fn recv_event(events: &mut mpsc::Receiver<PipelineEvent>) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Drain events until the predicate matches, returning everything seen
/// including the matching event
pub async fn collect_until(
    events: &mut mpsc::Receiver<PipelineEvent>,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    loop {
        let event = recv_event(events).await;
        let hit = pred(&event);
        out.push(event);
        if hit {
            return out;
        }
    }
}

/// Drain events until (and including) the next terminal turn event
pub async fn collect_turn(events: &mut mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    collect_until(events, |event| {
        matches!(event, PipelineEvent::TurnEnded { .. })
    })
    .await
}
