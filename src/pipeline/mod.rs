//! Turn pipeline orchestration
//!
//! One [`TurnPipeline`] task runs per connection. It owns the endpoint
//! detector, the ingest buffer and the conversation history, accepts
//! [`PipelineInput`] from the transport, and drives each turn through
//! transcription, generation and synthesis. At most one turn is active
//! at a time: speech onset, direct text and explicit interrupts all
//! cancel the active turn before anything else happens, and cancellation
//! is acknowledged (the turn task is awaited) before the next turn
//! starts. Every turn ends with exactly one
//! [`PipelineEvent::TurnEnded`], after which the connection re-arms.

mod generation;
mod synthesis;
mod transcription;

pub use generation::GenerationStage;
pub use synthesis::UnitPolicy;
pub use transcription::TranscriptionStage;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use crate::audio::{
    AudioFormat, AudioIngestBuffer, EndpointConfig, EndpointDetector, EndpointEvent, pcm16_samples,
};
use crate::config::Config;
use crate::events::{PipelineEvent, Status};
use crate::history::{ChatMessage, ConversationHistory};
use crate::providers::ProviderSet;
use crate::turn::{TextToken, Turn, TurnInput, TurnState};
use crate::{Error, Result};

use synthesis::{FeedEnd, SynthesisStage};

/// Channel capacities and per-stage deadlines.
///
/// All channels are bounded; a slow consumer suspends its producer
/// instead of growing a queue. The synthesize deadline spans the whole
/// concurrent generation-plus-synthesis window, so it should exceed the
/// generate deadline to keep timeout attribution unambiguous.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Transport → pipeline input queue
    pub input_buffer: usize,
    /// Pipeline → transport event queue
    pub event_buffer: usize,
    /// Generation → synthesis token queue
    pub token_buffer: usize,
    /// Synthesis → TTS provider unit queue
    pub unit_buffer: usize,
    /// Deadline for one STT call
    pub transcribe_timeout_ms: u64,
    /// Deadline for the full token stream
    pub generate_timeout_ms: u64,
    /// Deadline for the full synthesis window
    pub synthesize_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_buffer: 64,
            event_buffer: 32,
            token_buffer: 32,
            unit_buffer: 4,
            transcribe_timeout_ms: 15_000,
            generate_timeout_ms: 30_000,
            synthesize_timeout_ms: 45_000,
        }
    }
}

/// Input accepted by a running pipeline
#[derive(Debug)]
pub enum PipelineInput {
    /// Raw PCM16 little-endian audio from the client microphone
    Audio(Vec<u8>),
    /// Direct text, entering the pipeline past transcription
    Text(String),
    /// Explicit request to stop the active turn
    Interrupt,
}

/// Fires the cooperative cancel signal for one turn
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent; observers wake at most once.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of a turn's cancel signal
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If the handle is dropped without firing, this never resolves;
    /// a vanished handle must not look like an interrupt.
    pub async fn canceled(&mut self) {
        if self.rx.wait_for(|canceled| *canceled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A fresh, unfired cancel pair
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// How a stage ended when it did not fail
#[derive(Debug)]
pub enum StageExit<T> {
    /// Natural completion
    Done(T),
    /// The stage observed cancellation and stopped cleanly
    Canceled,
}

/// Items on the generation → synthesis channel.
///
/// `Done` is sent only on natural completion of the token stream; a
/// channel that closes without it tells the consumer the stream was cut
/// and any buffered tail must not be spoken.
#[derive(Debug, Clone)]
pub enum TokenFeed {
    /// One live token
    Token(TextToken),
    /// Natural end of the stream; the buffered tail is final
    Done,
}

/// What a finished turn task reports back to the connection loop
#[derive(Debug)]
pub(crate) struct TurnReport {
    pub id: Uuid,
    pub state: TurnState,
    pub duration_ms: u64,
    /// `Some((user, assistant))` only when the turn completed
    pub exchange: Option<(String, String)>,
}

impl TurnReport {
    fn crashed(id: Uuid) -> Self {
        Self {
            id,
            state: TurnState::Failed,
            duration_ms: 0,
            exchange: None,
        }
    }
}

/// Per-connection pipeline, configured but not yet running
pub struct TurnPipeline {
    providers: ProviderSet,
    config: PipelineConfig,
    endpoint: EndpointConfig,
    policy: UnitPolicy,
    format: AudioFormat,
    system_prompt: String,
}

impl TurnPipeline {
    /// Assemble a pipeline from resolved configuration
    #[must_use]
    pub fn new(providers: ProviderSet, config: &Config) -> Self {
        Self {
            providers,
            config: config.pipeline.clone(),
            endpoint: config.endpoint,
            policy: config.synthesis.clone(),
            format: AudioFormat {
                sample_rate: config.endpoint.sample_rate,
                channels: 1,
            },
            system_prompt: config.persona.system_prompt.clone(),
        }
    }

    /// Start the pipeline task.
    ///
    /// Returns the input handle and the event stream. The task exits
    /// when the handle is dropped, canceling any active turn first.
    #[must_use]
    pub fn spawn(self) -> (PipelineHandle, mpsc::Receiver<PipelineEvent>) {
        let (input_tx, input_rx) = mpsc::channel(self.config.input_buffer);
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);
        let task = tokio::spawn(Connection::new(self, event_tx).run(input_rx));
        (
            PipelineHandle {
                input: input_tx,
                task,
            },
            event_rx,
        )
    }
}

/// Input side of a running pipeline
pub struct PipelineHandle {
    input: mpsc::Sender<PipelineInput>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Queue one input, suspending while the pipeline is backlogged.
    ///
    /// # Errors
    ///
    /// [`Error::PipelineClosed`] once the pipeline task has exited.
    pub async fn send(&self, input: PipelineInput) -> Result<()> {
        self.input
            .send(input)
            .await
            .map_err(|_| Error::PipelineClosed)
    }

    /// Clone of the input sender, for a task that feeds the pipeline
    /// independently of the handle. The pipeline stays up until the
    /// handle and every clone are gone.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<PipelineInput> {
        self.input.clone()
    }

    /// Close the input side and wait for the pipeline task to finish.
    /// An active turn is canceled and acknowledged on the way out.
    pub async fn shutdown(self) {
        drop(self.input);
        let _ = self.task.await;
    }
}

struct ActiveTurn {
    id: Uuid,
    cancel: CancelHandle,
    task: JoinHandle<TurnReport>,
}

enum Step {
    Input(Option<PipelineInput>),
    Settled(std::result::Result<TurnReport, JoinError>),
}

/// The per-connection pipeline task state
struct Connection {
    providers: ProviderSet,
    config: PipelineConfig,
    policy: UnitPolicy,
    detector: EndpointDetector,
    ingest: AudioIngestBuffer,
    history: ConversationHistory,
    events: mpsc::Sender<PipelineEvent>,
    active: Option<ActiveTurn>,
}

impl Connection {
    fn new(pipeline: TurnPipeline, events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            detector: EndpointDetector::new(pipeline.endpoint),
            ingest: AudioIngestBuffer::new(pipeline.format),
            history: ConversationHistory::with_system(pipeline.system_prompt.as_str()),
            providers: pipeline.providers,
            config: pipeline.config,
            policy: pipeline.policy,
            events,
            active: None,
        }
    }

    async fn run(mut self, mut inputs: mpsc::Receiver<PipelineInput>) {
        let _ = self
            .events
            .send(PipelineEvent::Status(Status::Listening))
            .await;

        loop {
            let step = {
                let settled = async {
                    match self.active.as_mut() {
                        Some(turn) => (&mut turn.task).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    input = inputs.recv() => Step::Input(input),
                    joined = settled => Step::Settled(joined),
                }
            };

            match step {
                Step::Input(Some(PipelineInput::Audio(bytes))) => self.on_audio(bytes).await,
                Step::Input(Some(PipelineInput::Text(text))) => self.on_text(text).await,
                Step::Input(Some(PipelineInput::Interrupt)) => self.on_interrupt().await,
                Step::Input(None) => {
                    tracing::debug!("input closed; tearing down pipeline");
                    self.cancel_active().await;
                    return;
                }
                Step::Settled(joined) => self.on_settled(joined).await,
            }
        }
    }

    /// Feed one audio frame through the endpoint detector
    async fn on_audio(&mut self, bytes: Vec<u8>) {
        let samples = pcm16_samples(&bytes);
        match self.detector.process(&samples) {
            Some(EndpointEvent::SpeechStart) => {
                if self.active.is_some() {
                    tracing::info!("barge-in: speech onset during an active turn");
                    self.cancel_active().await;
                }
                if self.ingest.open().is_err() {
                    // stale region left behind by an earlier anomaly
                    tracing::warn!("utterance already open at speech onset; restarting it");
                    self.ingest.discard();
                    let _ = self.ingest.open();
                }
                self.append_frame(&bytes);
            }
            Some(EndpointEvent::SpeechEnd) => {
                self.append_frame(&bytes);
                match self.ingest.seal_and_drain() {
                    Ok(utterance) => {
                        if self.active.is_some() {
                            self.cancel_active().await;
                        }
                        self.start(TurnInput::Voice(utterance));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "no usable utterance at speech end");
                        self.ingest.discard();
                    }
                }
            }
            None => {
                if self.ingest.is_open() {
                    self.append_frame(&bytes);
                }
            }
        }
    }

    fn append_frame(&mut self, bytes: &[u8]) {
        if let Err(e) = self.ingest.append(bytes) {
            tracing::warn!(error = %e, "dropping audio frame");
        }
    }

    /// Direct text supersedes whatever is in flight
    async fn on_text(&mut self, text: String) {
        if self.active.is_some() {
            tracing::info!("text input during an active turn; superseding it");
            self.cancel_active().await;
        }
        self.start(TurnInput::Text(text));
    }

    async fn on_interrupt(&mut self) {
        if self.active.is_some() {
            self.cancel_active().await;
        } else {
            tracing::debug!("interrupt with no active turn");
        }
    }

    /// The active turn finished on its own
    async fn on_settled(&mut self, joined: std::result::Result<TurnReport, JoinError>) {
        let Some(turn) = self.active.take() else {
            return;
        };
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(turn = %turn.id, error = %e, "turn task crashed");
                TurnReport::crashed(turn.id)
            }
        };
        self.finish(report).await;
    }

    /// Fire the cancel signal and wait for the turn task to acknowledge
    /// by returning. Nothing is emitted for a turn after this resolves.
    async fn cancel_active(&mut self) {
        if let Some(turn) = self.active.take() {
            let id = turn.id;
            turn.cancel.fire();
            let report = match turn.task.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(turn = %id, error = %e, "turn task crashed during cancel");
                    TurnReport::crashed(id)
                }
            };
            self.finish(report).await;
        }
    }

    /// Emit the turn's single terminal event and re-arm
    async fn finish(&mut self, report: TurnReport) {
        if report.state == TurnState::Completed {
            if let Some((user, assistant)) = report.exchange {
                self.history.push_exchange(user, assistant);
            }
        }
        tracing::info!(
            turn = %report.id,
            state = report.state.as_str(),
            duration_ms = report.duration_ms,
            "turn ended"
        );
        let _ = self
            .events
            .send(PipelineEvent::TurnEnded {
                turn_id: report.id,
                state: report.state,
                duration_ms: report.duration_ms,
            })
            .await;
        let _ = self.events.send(PipelineEvent::Status(Status::Idle)).await;
        let _ = self
            .events
            .send(PipelineEvent::Status(Status::Listening))
            .await;
    }

    fn start(&mut self, input: TurnInput) {
        let (handle, signal) = cancel_pair();
        let turn = Turn::new();
        let id = turn.id;
        let kind = match &input {
            TurnInput::Voice(_) => "voice",
            TurnInput::Text(_) => "text",
        };
        tracing::info!(turn = %id, input = kind, "turn started");

        let ctx = TurnContext {
            providers: self.providers.clone(),
            config: self.config.clone(),
            policy: self.policy.clone(),
            history: self.history.snapshot(),
            events: self.events.clone(),
            cancel: signal,
        };
        let task = tokio::spawn(run_turn(ctx, turn, input));
        self.active = Some(ActiveTurn {
            id,
            cancel: handle,
            task,
        });
    }
}

/// Everything one turn task needs, detached from the connection state
struct TurnContext {
    providers: ProviderSet,
    config: PipelineConfig,
    policy: UnitPolicy,
    history: Vec<ChatMessage>,
    events: mpsc::Sender<PipelineEvent>,
    cancel: CancelSignal,
}

/// Drive one turn to its terminal state.
///
/// Returns only after every stage has stopped: the generation task is
/// joined and the synthesis stage has drained the provider's audio
/// stream, so a return from this future is the turn's cancellation
/// acknowledgment. All stage events are emitted from here; the terminal
/// event is the caller's.
async fn run_turn(mut ctx: TurnContext, mut turn: Turn, input: TurnInput) -> TurnReport {
    let _ = ctx
        .events
        .send(PipelineEvent::Status(Status::Thinking))
        .await;

    let transcript = match input {
        TurnInput::Voice(utterance) => {
            turn.advance(TurnState::Transcribing);
            let stage = TranscriptionStage::new(
                Arc::clone(&ctx.providers.stt),
                Duration::from_millis(ctx.config.transcribe_timeout_ms),
            );
            match stage.run(&utterance, &mut ctx.cancel).await {
                Ok(StageExit::Done(text)) => text,
                Ok(StageExit::Canceled) => return report_canceled(turn),
                Err(e) => return report_failed(turn, e, &ctx.events).await,
            }
        }
        TurnInput::Text(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return report_failed(turn, Error::EmptyTranscript, &ctx.events).await;
            }
            text
        }
    };

    turn.set_transcript(transcript.clone());
    let _ = ctx
        .events
        .send(PipelineEvent::Transcript {
            turn_id: turn.id,
            text: transcript.clone(),
        })
        .await;

    turn.advance(TurnState::Generating);

    let (token_tx, token_rx) = mpsc::channel(ctx.config.token_buffer);

    let generation = GenerationStage::new(
        Arc::clone(&ctx.providers.llm),
        Duration::from_millis(ctx.config.generate_timeout_ms),
    );
    let gen_task = tokio::spawn({
        let history = std::mem::take(&mut ctx.history);
        let prompt = transcript.clone();
        let events = ctx.events.clone();
        let cancel = ctx.cancel.clone();
        let turn_id = turn.id;
        async move {
            generation
                .run(turn_id, history, prompt, token_tx, events, cancel)
                .await
        }
    });

    let synthesis = SynthesisStage::new(
        Arc::clone(&ctx.providers.tts),
        ctx.policy.clone(),
        ctx.config.unit_buffer,
    );
    let synth_result = tokio::time::timeout(
        Duration::from_millis(ctx.config.synthesize_timeout_ms),
        synthesis.run(&mut turn, token_rx, &ctx.events, ctx.cancel.clone()),
    )
    .await;

    // A timed-out or failed synthesis drops the token receiver, which
    // unwinds generation through its send path; the join below is what
    // guarantees no turn work is left running.
    let gen_result = match gen_task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(turn = %turn.id, error = %e, "generation task aborted");
            Err(Error::GenerationFailed(format!(
                "generation task aborted: {e}"
            )))
        }
    };

    match synth_result {
        Err(_elapsed) => {
            if ctx.cancel.is_canceled() {
                return report_canceled(turn);
            }
            if let Err(e) = gen_result {
                return report_failed(turn, e, &ctx.events).await;
            }
            let e = Error::StageTimeout {
                stage: "synthesis",
                timeout_ms: ctx.config.synthesize_timeout_ms,
            };
            report_failed(turn, e, &ctx.events).await
        }
        Ok(Err(e)) => {
            if ctx.cancel.is_canceled() {
                return report_canceled(turn);
            }
            match gen_result {
                Err(gen_err) => report_failed(turn, gen_err, &ctx.events).await,
                Ok(_) => report_failed(turn, e, &ctx.events).await,
            }
        }
        Ok(Ok((feed, relay))) => {
            if ctx.cancel.is_canceled() {
                return report_canceled(turn);
            }
            match gen_result {
                Err(e) => report_failed(turn, e, &ctx.events).await,
                Ok(StageExit::Canceled) => {
                    if let Some(e) = relay.error {
                        return report_failed(turn, e, &ctx.events).await;
                    }
                    report_canceled(turn)
                }
                Ok(StageExit::Done(response)) => {
                    if let Some(e) = relay.error {
                        return report_failed(turn, e, &ctx.events).await;
                    }
                    match feed {
                        FeedEnd::Completed => report_completed(turn, transcript, response),
                        FeedEnd::Canceled => report_canceled(turn),
                    }
                }
            }
        }
    }
}

fn report_completed(mut turn: Turn, transcript: String, response: String) -> TurnReport {
    turn.set_response(response.clone());
    turn.advance(TurnState::Completed);
    let duration_ms = turn.elapsed_ms();
    tracing::info!(turn = %turn.id, duration_ms, "turn completed");
    TurnReport {
        id: turn.id,
        state: TurnState::Completed,
        duration_ms,
        exchange: Some((transcript, response)),
    }
}

fn report_canceled(mut turn: Turn) -> TurnReport {
    turn.advance(TurnState::Canceled);
    tracing::info!(turn = %turn.id, "turn canceled");
    TurnReport {
        id: turn.id,
        state: TurnState::Canceled,
        duration_ms: turn.elapsed_ms(),
        exchange: None,
    }
}

async fn report_failed(mut turn: Turn, error: Error, events: &mpsc::Sender<PipelineEvent>) -> TurnReport {
    tracing::warn!(turn = %turn.id, error = %error, "turn failed");
    let _ = events
        .send(PipelineEvent::from_error(Some(turn.id), &error))
        .await;
    turn.advance(TurnState::Failed);
    TurnReport {
        id: turn.id,
        state: TurnState::Failed,
        duration_ms: turn.elapsed_ms(),
        exchange: None,
    }
}
