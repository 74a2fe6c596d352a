use std::sync::Arc;

mod acquire;
mod config;
mod model;
mod models;
mod normalize;
mod prompt;
mod routes;

use config::Config;
use model::WorkersAi;
use routes::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    let http = acquire::build_http_client().unwrap();
    let workers_ai = WorkersAi::from_config(http.clone(), &config);
    if !workers_ai.is_configured() {
        tracing::warn!("CF_ACCOUNT_ID / CF_API_TOKEN not set; model calls will fail");
    }
    tracing::info!(model = %config.model, "using Workers AI");

    let app = routes::router(AppState {
        http,
        model: Arc::new(workers_ai),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
