use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inference_gateway::api::{self, AppState};
use inference_gateway::config::Args;
use inference_gateway::device::{device_info, select_device};
use inference_gateway::registry::{ModelKind, ModelRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "inference_gateway=info,tower_http=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let device = select_device(args.cpu, args.device_ordinal);
    info!("Using device: {}", device_info(&device));

    let registry = ModelRegistry::from_args(&args, device);

    if args.preload {
        for kind in [ModelKind::ImageClassifier, ModelKind::ConversationalGenerator] {
            // A failed preload is retried lazily by the first request
            if let Err(e) = registry.get_or_load(kind).await {
                warn!("Preloading {} failed: {}", kind, e);
            }
        }
    }

    let state = Arc::new(AppState::new(registry, args.max_upload_bytes));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::new(args.host.parse()?, args.port);

    info!(
        "Serving on http://{} (classifier: {}, chat: {})",
        addr, args.classifier_model, args.chat_model
    );
    info!("Endpoints: GET /, GET /health, POST /predict, POST /chat");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
