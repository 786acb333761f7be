//! Loopback analysis bridge binary.
//!
//! Runs the local analysis request server against the stand-in engine so a
//! parent process (or a developer) can exercise the HTTP surface. Logs go
//! to stderr; stdout carries exactly one JSON line with the negotiated
//! `{"port": .., "token": ..}` pair once the server is listening.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use roslyn_bridge::{LocalAnalysisServer, NullEngine, SessionLimits};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "roslyn-bridge", version, about = "Loopback analysis request server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default)
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Per-request deadline in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,
    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_bytes: u64,
    /// Bind-and-listen attempts before giving up
    #[arg(long, default_value_t = 10)]
    max_start_attempts: u32,
    /// Declared ceiling on concurrently handled requests
    #[arg(long, default_value_t = 20)]
    max_concurrent_requests: u32,
}

impl Default for ServeArgs {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            request_timeout_secs: limits.request_timeout.as_secs(),
            max_body_bytes: limits.max_body_bytes,
            max_start_attempts: limits.max_start_attempts,
            max_concurrent_requests: limits.max_concurrent_requests,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr; stdout is reserved for the published session.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roslyn_bridge=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_serve(args).await,
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let limits = SessionLimits {
        max_start_attempts: args.max_start_attempts,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        max_body_bytes: args.max_body_bytes,
        max_concurrent_requests: args.max_concurrent_requests,
    };

    let server = Arc::new(LocalAnalysisServer::new(Arc::new(NullEngine), limits));
    let mut session = server.session();

    let mut runner = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let handle = tokio::select! {
        published = session.wait_for(|published| published.is_some()) => {
            published
                .map_err(|_| anyhow::anyhow!("server dropped before publishing a session"))?
                .clone()
                .expect("session is some")
        }
        _ = &mut runner => {
            anyhow::bail!("server exited before publishing a session");
        }
    };

    // The out-of-band publication channel for the trusted peer.
    println!(
        "{}",
        serde_json::json!({ "port": handle.port, "token": handle.secret.expose() })
    );

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received");
    server.shutdown();
    let _ = runner.await;

    Ok(())
}
