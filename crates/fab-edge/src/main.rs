// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use fab_config::{EnvConfig, FabricConfig};
use fab_edge::{build_app, AppState};
use fab_policy::RetryPolicy;
use fab_realm::{ContentRealm, PlatformRealm};
use fab_runtime::{Runtime, RuntimeOptions};
use fab_telemetry::LogFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fabricd", version, about = "Execution fabric daemon")]
struct Args {
    /// Optional TOML config overlay for dispatcher and retry knobs.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit one JSON object per log line.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Missing required environment fails startup; the core does not
    // degrade gracefully.
    let env = EnvConfig::from_env().context("read required environment")?;
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    fab_telemetry::init_tracing(&env.log_level, format);

    let config = fab_config::load_config(args.config.as_deref()).context("load config")?;
    for warning in config.validate().context("validate config")? {
        warn!(target: "fab.edge", %warning, "config warning");
    }

    let runtime = build_runtime(&config).await?;
    info!(
        target: "fab.edge",
        redis = %env.redis_url,
        blob = %env.blob_endpoint,
        rows = %env.row_dsn,
        graph = %env.graph_endpoint,
        intent_types = ?runtime.intent_types(),
        "fabric runtime ready"
    );

    let state = Arc::new(AppState {
        runtime,
        started_at: Instant::now(),
    });
    let app = build_app(state);

    let bind = format!("0.0.0.0:{}", env.runtime_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(target: "fab.edge", %bind, "fabricd listening");

    axum::serve(listener, app).await.context("serve")
}

async fn build_runtime(config: &FabricConfig) -> Result<Runtime> {
    let options = RuntimeOptions {
        per_tenant_parallelism: config.per_tenant_parallelism,
        queue_high_water: config.queue_high_water,
        default_timeout: Duration::from_secs(config.default_timeout_secs),
        retry: RetryPolicy::new()
            .with_max_attempts(config.retry_max_attempts)
            .with_base_delay(Duration::from_millis(config.retry_base_delay_ms)),
    };
    Runtime::builder()
        .options(options)
        .register_realm(Arc::new(ContentRealm::new()))
        .register_realm(Arc::new(PlatformRealm::new()))
        .build()
        .await
        .context("build runtime")
}
