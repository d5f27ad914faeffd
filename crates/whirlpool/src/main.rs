//! `whirlpool`: the caerulean listener (spec §4.7). Binds both wire
//! protocols, brings up a shared tunnel device, and bridges every
//! accepted session to it until SIGINT/SIGTERM.

mod cli;
mod pool;
mod registry;
mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use pool::AddressPool;
use registry::Registry;
use seaside_crypto::Asymmetric;
use seaside_protocol::{PortConfig, TyphoonConfig};

fn netmask_for(host_bits: u32) -> Ipv4Addr {
    let mask = if host_bits >= 32 { 0 } else { u32::MAX << host_bits };
    Ipv4Addr::from(mask)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "whirlpool=info".into()))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "whirlpool exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let listener_keys = match &cli.seed {
        Some(hex_seed) => {
            let bytes = hex::decode(hex_seed)?;
            let seed: [u8; 64] = bytes.try_into().map_err(|_| anyhow::anyhow!("seed must be 64 bytes"))?;
            Asymmetric::from_seed(&seed)
        }
        None => Asymmetric::generate(),
    };
    tracing::info!(public_key = %hex::encode(listener_keys.public_key()), "listener identity ready");

    let own_address = Ipv4Addr::from(u32::from(cli.tunnel_network) + 1);
    let netmask = netmask_for(cli.tunnel_host_bits);

    let mut tun_config = tun::Configuration::default();
    tun_config.name(&cli.tunnel_name).address(own_address).netmask(netmask).mtu(cli.mtu as i32).up();
    #[cfg(target_os = "linux")]
    tun_config.platform(|platform_config| {
        platform_config.packet_information(false);
    });
    let device = tun::create_as_async(&tun_config)?;
    tracing::info!(name = %cli.tunnel_name, %own_address, "shared tunnel up");

    let device = Arc::new(Mutex::new(device));
    let pool = Arc::new(Mutex::new(AddressPool::new(cli.tunnel_network, cli.tunnel_host_bits)));
    let registry = Arc::new(Registry::new());

    let reader = tokio::spawn(server::run_tunnel_reader(Arc::clone(&device), Arc::clone(&registry)));

    let port_keys = Arc::new(listener_keys.clone());
    let port_bind = SocketAddr::new(cli.bind_address, cli.port_port);
    let port_task = tokio::spawn(server::run_port_listener(
        port_bind,
        port_keys,
        PortConfig::default(),
        Arc::clone(&device),
        Arc::clone(&pool),
        Arc::clone(&registry),
    ));

    let typhoon_bind = SocketAddr::new(cli.bind_address, cli.typhoon_port);
    let typhoon_task = tokio::spawn(server::run_typhoon_listener(
        typhoon_bind,
        listener_keys,
        TyphoonConfig::default(),
        Arc::clone(&device),
        Arc::clone(&pool),
        Arc::clone(&registry),
    ));

    wait_for_signal().await;
    tracing::warn!("shutdown signal received, closing all sessions");
    registry.close_all().await;

    reader.abort();
    port_task.abort();
    typhoon_task.abort();
    Ok(())
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
