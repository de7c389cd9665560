mod config;
mod error;
mod jobs;
mod models;
mod routes;
mod services;
mod utils;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Settings;
use crate::jobs::JobRegistry;
use crate::routes::AppState;
use crate::services::llm::LLMClient;
use crate::services::pipeline::Pipeline;
use crate::services::tokens::TokenCounter;

const EVICTION_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::from_env());

    // Loading the BPE tables is CPU-bound
    let counter = tokio::task::spawn_blocking(TokenCounter::new).await?;
    tracing::info!(scheme = ?counter.scheme(), "token counter ready");

    let llm_client = Arc::new(LLMClient::new(&settings.api_url, &settings.model));
    let pipeline = Arc::new(Pipeline::new(llm_client, Arc::new(counter)));
    let jobs = Arc::new(JobRegistry::new(
        pipeline,
        settings.output_dir.clone(),
        settings.job_retention,
    ));
    tokio::spawn(jobs.clone().evict_periodically(EVICTION_PERIOD));

    let app_state = AppState {
        jobs,
        settings: settings.clone(),
    };

    let app = routes::router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(tower_http::cors::AllowMethods::any())
                    .allow_headers(tower_http::cors::AllowHeaders::any()),
            ),
    );

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(
        model = %settings.model,
        output_dir = %settings.output_dir.display(),
        "Listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;

    Ok(())
}
