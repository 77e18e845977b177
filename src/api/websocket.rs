//! WebSocket endpoint for streaming voice sessions
//!
//! Each connection runs its own pipeline. Binary frames carry raw PCM16
//! microphone audio; text frames carry JSON control messages. Everything
//! the pipeline emits goes back as JSON, with synthesized audio base64
//! encoded inside the envelope.

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use crate::error::ErrorKind;
use crate::events::{PipelineEvent, Status};
use crate::pipeline::{PipelineInput, TurnPipeline};
use crate::turn::TurnState;

/// Incoming WebSocket message from the client.
///
/// Binary frames are accepted too and treated as one `audio` payload
/// without the base64 envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Base64-encoded PCM16 microphone frame
    Audio { data: String },
    /// Direct text input, skipping capture and transcription
    Text { content: String },
    /// Barge-in: stop the active turn
    Interrupt,
}

/// Outgoing WebSocket message to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Activity status changed
    Status { status: Status },
    /// The utterance was transcribed (or direct text accepted)
    Transcript { turn_id: Uuid, text: String },
    /// One generated text increment
    Token { turn_id: Uuid, seq: u64, text: String },
    /// One synthesized audio chunk, base64 encoded
    Audio { turn_id: Uuid, seq: u64, data: String },
    /// A stage failed; the turn is about to end
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<Uuid>,
        kind: ErrorKind,
        detail: String,
    },
    /// Terminal marker: nothing for this turn follows
    TurnEnded {
        turn_id: Uuid,
        state: TurnState,
        duration_ms: u64,
    },
}

impl From<PipelineEvent> for WsOutgoing {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Status(status) => Self::Status { status },
            PipelineEvent::Transcript { turn_id, text } => Self::Transcript { turn_id, text },
            PipelineEvent::Token { turn_id, token } => Self::Token {
                turn_id,
                seq: token.seq,
                text: token.text,
            },
            PipelineEvent::Audio { turn_id, chunk } => Self::Audio {
                turn_id,
                seq: chunk.seq,
                data: base64::engine::general_purpose::STANDARD.encode(&chunk.audio),
            },
            PipelineEvent::Error {
                turn_id,
                kind,
                detail,
            } => Self::Error {
                turn_id,
                kind,
                detail,
            },
            PipelineEvent::TurnEnded {
                turn_id,
                state,
                duration_ms,
            } => Self::TurnEnded {
                turn_id,
                state,
                duration_ms,
            },
        }
    }
}

/// Build WebSocket router
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection.
///
/// The socket splits into paired tasks: one forwards outgoing frames, one
/// feeds client frames into the pipeline. When either side ends the other
/// is aborted and the pipeline is shut down, which cancels any active turn
/// and waits for its acknowledgment before the forwarders wind down.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    tracing::info!(session_id = %session_id, "voice session connected");

    let (handle, mut events) = TurnPipeline::new(state.providers.clone(), &state.config).spawn();

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WsOutgoing>(32);

    // Forward outgoing frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Bridge pipeline events into the outgoing channel
    let bridge_tx = out_tx.clone();
    let bridge_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if bridge_tx.send(WsOutgoing::from(event)).await.is_err() {
                break;
            }
        }
    });

    // Feed client frames into the pipeline
    let input = handle.sender();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                Message::Binary(data) => {
                    if input.send(PipelineInput::Audio(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    if dispatch_frame(&text, &input, &out_tx).await.is_err() {
                        break;
                    }
                }
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %session_id, "socket closed by client");
                    break;
                }
                Message::Pong(_) => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    handle.shutdown().await;
    bridge_task.abort();

    tracing::info!(session_id = %session_id, "voice session closed");
}

/// Decode one JSON control frame and feed the pipeline.
///
/// Malformed frames are reported back to the client and dropped; only a
/// closed pipeline ends the session loop.
async fn dispatch_frame(
    text: &str,
    input: &mpsc::Sender<PipelineInput>,
    out: &mpsc::Sender<WsOutgoing>,
) -> crate::Result<()> {
    let incoming: WsIncoming = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            report_bad_frame(out, &crate::Error::Config(format!("invalid message: {e}"))).await;
            return Ok(());
        }
    };

    let payload = match incoming {
        WsIncoming::Audio { data } => {
            match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(bytes) => PipelineInput::Audio(bytes),
                Err(e) => {
                    report_bad_frame(
                        out,
                        &crate::Error::Audio(format!("invalid audio payload: {e}")),
                    )
                    .await;
                    return Ok(());
                }
            }
        }
        WsIncoming::Text { content } => PipelineInput::Text(content),
        WsIncoming::Interrupt => PipelineInput::Interrupt,
    };

    input
        .send(payload)
        .await
        .map_err(|_| crate::Error::PipelineClosed)
}

/// Tell the client a frame could not be handled
async fn report_bad_frame(out: &mpsc::Sender<WsOutgoing>, error: &crate::Error) {
    tracing::warn!(error = %error, "dropping malformed frame");
    let _ = out
        .send(WsOutgoing::Error {
            turn_id: None,
            kind: error.kind(),
            detail: error.to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::{AudioChunk, TextToken};

    #[test]
    fn status_frame_serializes() {
        let msg = WsOutgoing::from(PipelineEvent::Status(Status::Listening));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"status\":\"listening\""));
    }

    #[test]
    fn token_frame_carries_seq_and_text() {
        let msg = WsOutgoing::from(PipelineEvent::Token {
            turn_id: Uuid::new_v4(),
            token: TextToken::new(3, "hello"),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"token\""));
        assert!(json.contains("\"seq\":3"));
        assert!(json.contains("\"text\":\"hello\""));
    }

    #[test]
    fn audio_frame_encodes_base64() {
        let msg = WsOutgoing::from(PipelineEvent::Audio {
            turn_id: Uuid::new_v4(),
            chunk: AudioChunk::new(0, vec![1, 2, 3, 4]),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let expected = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        assert!(json.contains("\"type\":\"audio\""));
        assert!(json.contains(&expected));
    }

    #[test]
    fn turn_ended_frame_serializes_state() {
        let msg = WsOutgoing::from(PipelineEvent::TurnEnded {
            turn_id: Uuid::new_v4(),
            state: TurnState::Completed,
            duration_ms: 1200,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"turn_ended\""));
        assert!(json.contains("\"state\":\"completed\""));
    }

    #[test]
    fn error_frame_omits_absent_turn_id() {
        let msg = WsOutgoing::Error {
            turn_id: None,
            kind: ErrorKind::Internal,
            detail: "invalid message".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("turn_id"));
        assert!(json.contains("\"kind\":\"internal\""));
    }

    #[test]
    fn text_frame_deserializes() {
        let json = r#"{"type":"text","content":"turn on the lights"}"#;
        let msg: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, WsIncoming::Text { content } if content == "turn on the lights"));
    }

    #[test]
    fn interrupt_frame_deserializes() {
        let json = r#"{"type":"interrupt"}"#;
        let msg: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, WsIncoming::Interrupt));
    }

    #[test]
    fn audio_frame_round_trips_base64() {
        let data = base64::engine::general_purpose::STANDARD.encode([0u8, 1, 2]);
        let json = format!(r#"{{"type":"audio","data":"{data}"}}"#);
        let msg: WsIncoming = serde_json::from_str(&json).unwrap();
        let WsIncoming::Audio { data } = msg else {
            panic!("expected audio frame");
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .unwrap();
        assert_eq!(bytes, vec![0, 1, 2]);
    }
}
