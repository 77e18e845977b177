//! HTTP server exposing the voice pipeline
//!
//! One WebSocket route carries the whole session protocol; the rest is a
//! liveness probe and optional static hosting for the browser client.

pub mod websocket;

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::Config;
use crate::providers::{
    ElevenLabsTts, OpenAiChat, OpenAiStt, OpenAiTts, ProviderSet, TextToSpeech,
};

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub providers: ProviderSet,
}

/// Assemble the provider set from resolved configuration.
///
/// Transcription and generation always run on `OpenAI`. Synthesis prefers
/// `ElevenLabs` when its key is configured and falls back to `OpenAI` speech
/// otherwise.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] when no `OpenAI` API key is configured
/// or a provider rejects its settings.
pub fn build_providers(config: &Config) -> Result<ProviderSet> {
    let openai_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| crate::Error::Config("OPENAI_API_KEY is not set".to_string()))?;

    let stt = Arc::new(OpenAiStt::new(
        openai_key.clone(),
        config.providers.stt_model.clone(),
    )?);
    let llm = Arc::new(OpenAiChat::new(
        openai_key.clone(),
        config.providers.llm_model.clone(),
        config.providers.llm_max_tokens,
    )?);

    let tts: Arc<dyn TextToSpeech> = match &config.api_keys.elevenlabs {
        Some(key) => {
            tracing::info!(
                voice_id = %config.providers.elevenlabs_voice_id,
                "synthesis via ElevenLabs"
            );
            Arc::new(ElevenLabsTts::new(
                key.clone(),
                config.providers.elevenlabs_voice_id.clone(),
                config.providers.elevenlabs_model.clone(),
            )?)
        }
        None => {
            tracing::info!(voice = %config.providers.tts_voice, "synthesis via OpenAI speech");
            Arc::new(OpenAiTts::new(
                openai_key,
                config.providers.tts_model.clone(),
                config.providers.tts_voice.clone(),
                config.providers.tts_speed,
            )?)
        }
    };

    Ok(ProviderSet { stt, llm, tts })
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub persona: String,
}

/// Liveness probe - is the relay running?
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        persona: state.config.persona.name.clone(),
    })
}

/// Build the relay router: the WebSocket route, the liveness probe and
/// the optional static fallback for the browser client.
#[must_use]
pub fn router(state: AppState) -> Router {
    let probes = Router::new()
        .route("/health", get(health))
        .with_state(state.clone());

    let mut router = Router::new()
        .nest("/ws", websocket::router(state.clone()))
        .merge(probes);

    // Serve the browser client if configured
    if let Some(static_dir) = &state.config.server.static_dir {
        let index_file = static_dir.join("index.html");
        let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file));

        router = router.fallback_service(serve_dir);
        tracing::info!(path = %static_dir.display(), "serving static files");
    }

    // CORS layer for cross-origin requests from the browser client
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: AppState,
    port: u16,
}

impl ApiServer {
    /// Build a server from resolved configuration and an assembled
    /// provider set.
    #[must_use]
    pub fn new(config: Config, providers: ProviderSet) -> Self {
        let port = config.server.port;
        Self {
            state: AppState {
                config: Arc::new(config),
                providers,
            },
            port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// exits abnormally.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
