use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use sidekick_server::auth::token::{load_or_generate_key, TokenIssuer};
use sidekick_server::auth::DevKeychain;
use sidekick_server::config::{generate_config_template, Cli, Config};
use sidekick_server::routes;
use sidekick_server::state::AppState;
use sidekick_server::ws::pool::WorkerPool;

/// How long in-flight sessions get to drain after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let conf = Config::load(&cli)?;

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(conf.log_directive()));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("sidekick-server v{} starting", env!("CARGO_PKG_VERSION"));

    let key = load_or_generate_key(&conf.auth.key_file)?;
    let issuer = Arc::new(TokenIssuer::new(
        &key,
        conf.auth.audience.clone(),
        conf.auth.token_ttl(),
    ));
    issuer.spawn_sweeper();

    let state = AppState {
        conf: Arc::new(conf),
        issuer,
        workers: Arc::new(WorkerPool::new()),
        keychain: Arc::new(DevKeychain),
    };

    let app = routes::build_router(state.clone());

    let listener = TcpListener::bind(&state.conf.address).await?;
    tracing::info!(address = %state.conf.address, "listening");

    // Serve until ctrl-c, then give in-flight sessions a bounded drain.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("stopping");
            let _ = shutdown_tx.send(());
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await.is_err() {
                tracing::warn!("drain timed out, aborting open sessions");
                server.abort();
            }
        }
    }

    Ok(())
}
