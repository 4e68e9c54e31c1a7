mod actions;
mod auth;
mod problem;
mod revalidate;
mod router;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use tracing::info;

use dashboard_storage::Database;
use dashboard_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database =
        Database::connect_with(&config.database.url, config.database.max_connections).await?;
    database.run_migrations().await?;

    let revalidation = revalidate::RevalidationHub::new();
    let identity = Arc::new(auth::CredentialsProvider::new(database.users()));
    let state = router::AppState::new(metrics, database, revalidation, identity);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        max_connections = config.database.max_connections,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
