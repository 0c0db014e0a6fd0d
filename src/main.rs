//! AutoForge service entry point.
//!
//! Wires the process-wide services (sandbox manager, agent gateway,
//! session store, orchestrator) and waits for shutdown. The HTTP surface
//! that feeds the orchestrator lives outside this crate and drives it
//! through the library API.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autoforge::config::Config;
use autoforge::gateway::AgentGateway;
use autoforge::llm::bot::PollingBotProvider;
use autoforge::llm::chat::ChatCompletionsProvider;
use autoforge::orchestrator::Orchestrator;
use autoforge::sandbox::{SandboxManager, SshTransport};
use autoforge::session::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "autoforge")]
#[command(about = "Autonomous multi-agent code-generation orchestrator")]
#[command(version)]
struct Args {
    /// Probe the remote container engine and exit.
    #[arg(long)]
    check_health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoforge=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AutoForge...");

    let config = Config::from_env()?;

    let transport = Arc::new(SshTransport::new(&config.sandbox));
    let sandbox = SandboxManager::new(config.sandbox.clone(), transport);
    tracing::info!(
        max_containers = config.sandbox.max_containers,
        host = %config.sandbox.vps_host,
        "Sandbox manager initialized"
    );

    if args.check_health {
        let health = sandbox.health_check().await;
        match health.engine_version {
            Some(version) => tracing::info!(version = %version, "Remote engine healthy"),
            None => tracing::error!(error = ?health.error, "Remote engine unreachable"),
        }
        return Ok(());
    }

    let bot = Arc::new(PollingBotProvider::new(config.llm.bot.clone())?);
    let chat = Arc::new(ChatCompletionsProvider::new(config.llm.chat.clone())?);
    let gateway = Arc::new(AgentGateway::new(
        bot,
        chat,
        config.llm.models.clone(),
        config.gateway.clone(),
    ));
    tracing::info!("Agent gateway initialized");

    let sessions = SessionStore::new();
    let orchestrator = Orchestrator::new(Arc::clone(&sandbox));

    let reaper = sandbox.spawn_reaper();
    let sweeper = sessions.spawn_sweeper();
    tracing::info!("Background reaper and session sweeper running");

    // The HTTP surface lives outside this crate and drives these services;
    // the binary holds them alive until a shutdown signal arrives.
    serve_until_shutdown(&gateway, &orchestrator).await;
    tracing::info!("Shutdown signal received, cleaning up");

    reaper.abort();
    sweeper.abort();
    let report = sandbox.cleanup_all().await;
    tracing::info!(
        total = report.total,
        ok = report.ok,
        failed = report.failed,
        "Sandbox cleanup finished"
    );

    Ok(())
}

/// Park the process until shutdown, keeping the services reachable for
/// the embedding HTTP layer.
async fn serve_until_shutdown(gateway: &Arc<AgentGateway>, orchestrator: &Arc<Orchestrator>) {
    shutdown_signal().await;
    let stats = gateway.queue_stats();
    tracing::info!(
        served = stats.served,
        pending = stats.pending,
        executions = orchestrator.execution_count().await,
        "Final gateway and orchestrator state"
    );
}

/// Resolve on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
