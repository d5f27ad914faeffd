//! `algae`: the viridian VPN client (spec §4.6/§6.5). Parses the CLI
//! surface, resolves either a `--link` or `--address`/`--key` pair into a
//! session, and runs the coordinator until SIGINT/SIGTERM.

mod cli;
mod coordinator;
mod pump;

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use coordinator::Coordinator;
use seaside_control::{ControlChannel, HttpsControlChannel};

const DEFAULT_ROOT_CA_PATH: &str = "/etc/seaside/ca.pem";
const DEFAULT_CLIENT_CERT_PATH: &str = "/etc/seaside/client.pem";
const DEFAULT_CLIENT_KEY_PATH: &str = "/etc/seaside/client.key";
const DEFAULT_IDENTIFIER: &str = "default_algae_user";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "algae=info".into()))
        .init();

    match run().await {
        // Spec §4.6: "process exits non-zero when invoked via signal path."
        Ok(true) => ExitCode::FAILURE,
        Ok(false) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "algae exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Runs the client to completion. The `bool` distinguishes *why* shutdown
/// fired: `true` if a SIGINT/SIGTERM handler triggered it, `false` for any
/// other graceful cause (peer TERM, the `--command` subprocess exiting).
async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let (peer_addr, control_port): (IpAddr, u16) = match &cli.link {
        Some(link) => {
            let parsed = seaside_control::parse_link(link)?;
            (parsed.host.parse()?, parsed.control_port)
        }
        None => {
            let address = cli.address.ok_or_else(|| anyhow::anyhow!("--address or --link is required"))?;
            (address, cli.port)
        }
    };

    let control: Arc<dyn ControlChannel> =
        Arc::new(HttpsControlChannel::new(peer_addr.to_string(), control_port, DEFAULT_ROOT_CA_PATH, DEFAULT_CLIENT_CERT_PATH, DEFAULT_CLIENT_KEY_PATH).await?);
    let mut auth = control.authenticate(DEFAULT_IDENTIFIER, None, None, None).await?;

    // `--key` is the node owner's pre-shared public key (cli.rs), not a
    // control-RPC credential: when supplied, it overrides whatever
    // `public_key` the control plane reported.
    if let Some(key) = &cli.key {
        let bytes = hex::decode(key).map_err(|error| anyhow::anyhow!("--key must be hex-encoded: {error}"))?;
        auth.public_key = bytes.try_into().map_err(|_| anyhow::anyhow!("--key must decode to a 32-byte public key"))?;
    }

    let coordinator = Coordinator::new(peer_addr, cli.protocol, cli.tunnel_name, control, DEFAULT_IDENTIFIER.to_string(), auth);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signalled = Arc::new(AtomicBool::new(false));

    let signal_shutdown = shutdown_tx.clone();
    let signal_flag = Arc::clone(&signalled);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("shutdown signal received, tearing down");
        signal_flag.store(true, Ordering::SeqCst);
        let _ = signal_shutdown.send(true);
    });

    if let Some(command) = cli.command {
        let command_shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tracing::info!(%command, "running command inside the tunnel");
            match tokio::process::Command::new("sh").arg("-c").arg(&command).status().await {
                Ok(status) => tracing::info!(?status, "command finished, tearing down"),
                Err(error) => tracing::warn!(%error, "failed to spawn command"),
            }
            let _ = command_shutdown.send(true);
        });
    }

    coordinator.run(shutdown_rx).await?;
    Ok(signalled.load(Ordering::SeqCst))
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
