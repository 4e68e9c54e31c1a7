use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use dashboard_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to install prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_FILTER: &str = "info";

static TRACING: OnceLock<()> = OnceLock::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global subscriber: pretty output locally, JSON lines in production.
///
/// `RUST_LOG` overrides the default `info` filter. Repeated calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING.get().is_some() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let production = config.environment == Environment::Production;

    let json_layer = production.then(|| {
        tracing_fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
    });
    let pretty_layer = (!production).then(|| {
        tracing_fmt::layer()
            .pretty()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;
    TRACING.set(()).ok();

    tracing::info!(
        stage = "telemetry",
        env = config.environment.as_str(),
        version = VERSION,
        git_sha = git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut recorder = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = recorder.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *recorder = Some(handle.clone());
    drop(recorder);

    describe_gauge!("app_build_info", "Build metadata for the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since the recorder was installed");
    describe_counter!(
        "dashboard_actions_total",
        "Dashboard mutations by action and outcome"
    );
    describe_counter!(
        "view_revalidations_total",
        "View invalidations by dashboard path"
    );
    describe_counter!("auth_sign_in_total", "Sign-in attempts by result");

    gauge!("app_build_info", "version" => VERSION, "git" => git_sha()).set(1.0);
    STARTED_AT.get_or_init(Instant::now);

    Ok(handle)
}

/// Refreshes the uptime gauge and renders the exposition text.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let uptime = STARTED_AT
        .get()
        .map(|started| started.elapsed().as_secs_f64())
        .unwrap_or_default();
    gauge!("app_uptime_seconds").set(uptime);
    handle.render()
}
