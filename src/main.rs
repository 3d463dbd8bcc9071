use std::sync::Arc;

use offload::TaskEngine;
use offload::api::task_routes;
use offload::config::ServerConfig;
use offload::worker::spawn_reaper_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let engine = Arc::new(TaskEngine::from_env()?);
    let engine_config = engine.config().clone();
    let server_config = ServerConfig::from_env()?;

    eprintln!("Offload v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Task API: http://0.0.0.0:{}/api/tasks", server_config.port);
    eprintln!(
        "   Blocking slots: {}, retention: {}h",
        engine_config.max_blocking_tasks,
        engine_config.retention.as_secs() / 3600
    );

    // ── Reaper ──────────────────────────────────────────────────────────
    let _reaper_handle = spawn_reaper_task(
        engine.reaper(),
        engine_config.sweep_interval,
        engine_config.retention,
    );

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = task_routes(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port)).await?;
    tracing::info!(port = server_config.port, "Task API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    let summary = engine.summary();
    tracing::info!(
        running = summary.running,
        pending = summary.pending,
        "Shutting down"
    );
    Ok(())
}
