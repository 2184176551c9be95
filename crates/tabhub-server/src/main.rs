//! tabhub-server: local tab-sync hub.
//!
//! Accepts WebSocket connections from browser extensions on localhost,
//! keeps a durable record of every browser's open tabs, and relays
//! cross-browser tab pushes, queueing them while the target is offline.

mod api;
mod config;
mod hub;
mod limiter;
mod registry;
mod store;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};

use tabhub_core::{HubError, HubResult};

use api::{AppState, Control};
use config::{Settings, SharedSettings};
use hub::Hub;
use store::browsers::BrowserStore;
use store::pending::PendingStore;

/// tabhub-server — local tab-sync hub
#[derive(Parser, Debug)]
#[command(name = "tabhub-server", version, about = "Local tab-sync hub")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.tabhub/config.toml")]
    config: String,

    /// Data directory for the tab store and pending queue
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load settings (file + CLI overrides) before tracing exists.
    let config_path = PathBuf::from(&cli.config);
    let settings = match Settings::load(
        &config_path,
        cli.port,
        cli.data_dir.as_deref(),
        cli.log_level.as_deref(),
    ) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = settings.port,
        "starting tabhub-server"
    );

    // Launchers and OS autostart both start the service eagerly; a
    // polite exit beats a bind error.
    match probe_existing_instance(settings.port).await {
        InstanceCheck::PortFree => {}
        InstanceCheck::AlreadyRunning => {
            info!(port = settings.port, "another tabhub instance is already running");
            return;
        }
        InstanceCheck::PortInUse => {
            error!(
                port = settings.port,
                "port is in use by another application"
            );
            std::process::exit(1);
        }
    }

    let browsers = match BrowserStore::open(&settings.data_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open browser store");
            std::process::exit(1);
        }
    };
    let pending = match PendingStore::open(&settings.data_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open pending queue");
            std::process::exit(1);
        }
    };

    let settings: SharedSettings = Arc::new(RwLock::new(settings));
    let hub = Arc::new(Hub::new(settings, browsers, pending));

    let (control_tx, control_rx) = watch::channel(Control::Run);
    let control = Arc::new(control_tx);

    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            let _ = control.send(Control::Shutdown);
        });
    }

    if let Err(e) = serve_loop(Arc::clone(&hub), control, control_rx).await {
        error!(error = %e, "server error");
        hub.flush_all().await;
        std::process::exit(1);
    }

    hub.flush_all().await;
    info!("tabhub-server stopped");
}

/// Bind, serve, and rebind for as long as the control channel says
/// restart. Each pass rereads the port, so config changes take effect
/// on the next listener.
async fn serve_loop(
    hub: Arc<Hub>,
    control: Arc<watch::Sender<Control>>,
    mut control_rx: watch::Receiver<Control>,
) -> HubResult<()> {
    loop {
        let port = hub.settings.read().await.port;
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| HubError::Transport(format!("cannot bind {addr}: {e}")))?;
        info!(%addr, "listening");

        let state = AppState {
            hub: Arc::clone(&hub),
            control: Arc::clone(&control),
        };
        let app = api::router(state);

        let mut graceful_rx = control_rx.clone();
        let graceful_hub = Arc::clone(&hub);
        let graceful = async move {
            let _ = graceful_rx
                .wait_for(|cmd| !matches!(cmd, Control::Run))
                .await;
            // Open sockets would hold graceful shutdown forever.
            graceful_hub.shutdown_connections().await;
        };

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(graceful)
        .await
        .map_err(|e| HubError::Transport(e.to_string()))?;

        // Copy the command out; send() below needs the watch lock free.
        let cmd = *control_rx.borrow_and_update();
        match cmd {
            Control::Restart => {
                info!("restarting listener");
                let _ = control.send(Control::Run);
            }
            Control::Shutdown | Control::Run => break,
        }
    }
    Ok(())
}

/// What a probe of the configured port found.
enum InstanceCheck {
    PortFree,
    AlreadyRunning,
    PortInUse,
}

/// Ask whoever answers on `port` whether it is another tabhub.
async fn probe_existing_instance(port: u16) -> InstanceCheck {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
    {
        Ok(client) => client,
        Err(_) => return InstanceCheck::PortFree,
    };
    let url = format!("http://127.0.0.1:{port}/health");
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(_) => return InstanceCheck::PortFree,
    };
    if response.status().is_success() {
        if let Ok(body) = response.json::<serde_json::Value>().await {
            if body.get("app").and_then(|v| v.as_str()) == Some(config::APP_NAME) {
                return InstanceCheck::AlreadyRunning;
            }
        }
    }
    InstanceCheck::PortInUse
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
