use dotenvy::dotenv;
use pavebot::bot::Orchestrator;
use pavebot::config::{
    Settings, IDEMPOTENCY_MAX_ENTRIES, IDEMPOTENCY_RETENTION_SECS, RATE_WINDOW_MAX_ENTRIES,
    RATE_WINDOW_TTL_SECS, SESSION_MAX_ENTRIES, SESSION_TTL_SECS,
};
use pavebot::gateway::TwilioGateway;
use pavebot::llm::openai::OpenAiChat;
use pavebot::pipeline::Pipeline;
use pavebot::store::{IdempotencyLedger, MemoryCounterStore, RateLimiter, SessionStore};
use pavebot::tools::catalog::{register_catalog_tools, HttpOrderApi};
use pavebot::tools::ToolRegistry;
use pavebot::webhook::{self, WebhookState};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    init_logging();

    info!("Starting Pavebot WhatsApp assistant...");

    let settings = init_settings();

    let pipeline = build_pipeline(&settings);
    let state = Arc::new(WebhookState {
        pipeline,
        auth_token: settings.twilio_auth_token.clone(),
    });

    let app = webhook::router(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Webhook listening on {}", settings.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn build_pipeline(settings: &Settings) -> Arc<Pipeline> {
    let idempotency = Arc::new(IdempotencyLedger::new(
        IDEMPOTENCY_RETENTION_SECS,
        IDEMPOTENCY_MAX_ENTRIES,
    ));
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new(
            RATE_WINDOW_TTL_SECS,
            RATE_WINDOW_MAX_ENTRIES,
        )),
        settings.rate_limit_per_minute,
    ));
    let sessions = Arc::new(SessionStore::new(SESSION_TTL_SECS, SESSION_MAX_ENTRIES));

    let model = Arc::new(OpenAiChat::new(settings));
    info!("Chat model client initialized.");

    let mut registry = ToolRegistry::new();
    register_catalog_tools(&mut registry, Arc::new(HttpOrderApi::new(settings)));

    let orchestrator = Arc::new(Orchestrator::new(model, Arc::new(registry), sessions));
    let gateway = Arc::new(TwilioGateway::new(settings));

    Arc::new(Pipeline::new(idempotency, limiter, orchestrator, gateway))
}
