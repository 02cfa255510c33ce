use std::sync::Arc;

use anyhow::Context;

use agentic_api::cli;
use agentic_api::config::AgentConfig;
use agentic_api::engine::Engine;
use agentic_api::store::{Database, LibSqlBackend};
use agentic_api::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries protocol responses only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::from_env().context("invalid configuration")?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Option<Arc<dyn Database>> = match &config.db_path {
        Some(path) => {
            let backend = LibSqlBackend::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            Some(Arc::new(backend))
        }
        None => None,
    };

    let mut tools = ToolRegistry::new();
    tools.register_builtin_tools()?;

    eprintln!("🤖 {} v{}", config.name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.worker_count);
    eprintln!("   Scrape tool: {}", config.scrape_tool);
    match &config.db_path {
        Some(path) => eprintln!("   Database: {}", path.display()),
        None => eprintln!("   Database: in-memory"),
    }
    eprintln!("   One JSON request per line on stdin. Ctrl-D to exit.\n");

    let engine = Engine::start(config, tools, db).await?;

    tokio::select! {
        res = cli::run(&engine) => res.context("stdin channel failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    engine.shutdown().await;
    Ok(())
}
