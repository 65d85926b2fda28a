//! Gateway server: shared state, router, and listener loop

use crate::handler::chat_handler;
use axum::{extract::State, response::IntoResponse, routing::any, routing::get, Json, Router};
use chatproxy_context::{Cl100kLoader, LeaseLedger, VocabularyLoader};
use chatproxy_core::ProxyConfig;
use chatproxy_llm::{CompletionProvider, OpenAiProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared, read-only state for all requests.
pub struct GatewayState {
    pub config: ProxyConfig,
    pub provider: Arc<dyn CompletionProvider>,
    pub vocabulary: Arc<dyn VocabularyLoader>,
    /// Tokenizer leases handed out and returned across all requests.
    pub leases: LeaseLedger,
    pub started_at: Instant,
}

impl GatewayState {
    /// State backed by the OpenAI provider and the cl100k_base vocabulary.
    pub fn new(config: ProxyConfig) -> Self {
        let provider = OpenAiProvider::new().with_base_url(config.completion.upstream_url.clone());
        Self::with_components(config, Arc::new(provider), Arc::new(Cl100kLoader::new()))
    }

    pub fn with_components(
        config: ProxyConfig,
        provider: Arc<dyn CompletionProvider>,
        vocabulary: Arc<dyn VocabularyLoader>,
    ) -> Self {
        Self {
            config,
            provider,
            vocabulary,
            leases: LeaseLedger::new(),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/chat", any(chat_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_gateway(config: ProxyConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind.to_addr(), config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let state = Arc::new(GatewayState::new(config));

    // Build the vocabulary ahead of the first request; requests still wait on it if needed.
    let vocabulary = state.vocabulary.clone();
    tokio::spawn(async move {
        if let Err(e) = vocabulary.load().await {
            warn!("Vocabulary preload failed: {}", e);
        }
    });

    info!("Chatproxy Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Chat:     http://{}/api/chat", bind_addr);
    info!("  Upstream: {}", state.config.completion.upstream_url);
    info!(
        "  CORS:     {}",
        if state.config.cors.enabled {
            format!("enabled (origin {:?})", state.config.cors.allowed_origin)
        } else {
            "disabled".to_string()
        }
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.provider.name(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "tokenizer_leases_outstanding": state.leases.outstanding(),
    }))
}
