//! The session coordinator (spec §4.6): obtains a session, builds the
//! chosen transport, brings the tunnel up, runs the pump, and tears
//! everything down on any exit path. Grounded on
//! `sources/coordinator.py`'s `Coordinator` class for the phase ordering
//! and the healthcheck/interrupt behaviour it supplements beyond spec.md
//! (documented in `SPEC_FULL.md`'s "Supplemented from original_source/").

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::watch;

use seaside_control::{AuthResponse, ControlChannel};
use seaside_crypto::Asymmetric;
use seaside_protocol::{PortConfig, TyphoonConfig};
use seaside_transport::{PortClient, Transport, TyphoonClient};
use seaside_tunnel::{Tunnel, TunnelConfig};

use crate::cli::ProtocolChoice;
use crate::pump;

const DEFAULT_TUNNEL_ADDRESS: &str = "10.70.0.2";
const DEFAULT_TUNNEL_NETMASK: &str = "255.255.255.0";
const DEFAULT_SVA_MARK: u32 = 84;
const CLIENT_NAME: &str = "algae";
const MIN_HEALTHCHECK_SECS: u64 = 1;
const MAX_HEALTHCHECK_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("control channel error: {0}")]
    Control(#[from] seaside_control::ControlError),
    #[error("transport error: {0}")]
    Transport(#[from] seaside_transport::TransportError),
    #[error("tunnel error: {0}")]
    Tunnel(#[from] seaside_tunnel::TunnelError),
    #[error("pump error: {0}")]
    Pump(#[from] std::io::Error),
}

pub struct Coordinator {
    peer_addr: IpAddr,
    data_port: u16,
    protocol: ProtocolChoice,
    tunnel_name: String,
    control: Arc<dyn ControlChannel>,
    identifier: String,
    auth: AuthResponse,
}

impl Coordinator {
    pub fn new(
        peer_addr: IpAddr,
        protocol: ProtocolChoice,
        tunnel_name: String,
        control: Arc<dyn ControlChannel>,
        identifier: String,
        auth: AuthResponse,
    ) -> Self {
        let data_port = match protocol {
            ProtocolChoice::Port => auth.port_port,
            ProtocolChoice::Typhoon => auth.typhoon_port,
        };
        Self { peer_addr, data_port, protocol, tunnel_name, control, identifier, auth }
    }

    /// Runs the full session to completion: build transport, bring the
    /// tunnel up, pump traffic, tear down. Returns once the pump exits for
    /// any reason (peer TERM, error, or `shutdown` firing).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoordinatorError> {
        let listener_public = Asymmetric::from_public(self.auth.public_key);
        let data_addr = SocketAddr::new(self.peer_addr, self.data_port);

        let transport = match self.protocol {
            ProtocolChoice::Port => {
                let client =
                    PortClient::connect(data_addr, &listener_public, CLIENT_NAME, &self.auth.token, PortConfig::default()).await?;
                Transport::Port(client)
            }
            ProtocolChoice::Typhoon => {
                let client = TyphoonClient::connect(data_addr, &listener_public, CLIENT_NAME, &self.auth.token, TyphoonConfig::default()).await?;
                Transport::Typhoon(client)
            }
        };
        tracing::info!(peer = %self.peer_addr, port = self.data_port, protocol = ?self.protocol, "transport connected");

        let tunnel_config = TunnelConfig {
            name: self.tunnel_name.clone(),
            address: DEFAULT_TUNNEL_ADDRESS.parse().expect("valid literal"),
            netmask: DEFAULT_TUNNEL_NETMASK.parse().expect("valid literal"),
            sva_mark: DEFAULT_SVA_MARK,
        };
        let peer_v4 = match self.peer_addr {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => return Err(CoordinatorError::Tunnel(seaside_tunnel::TunnelError::DefaultInterface("IPv6 peers are not supported".into()))),
        };
        let tunnel = Tunnel::create(tunnel_config, peer_v4).await?;
        let (device, guard) = tunnel.up().await?;
        tracing::info!("tunnel up");

        let (pump_shutdown_tx, pump_shutdown_rx) = watch::channel(false);
        let healthcheck_shutdown = pump_shutdown_tx.subscribe();

        let healthcheck = tokio::spawn(Self::healthcheck_loop(self.identifier.clone(), self.control.clone(), healthcheck_shutdown));

        let forward_shutdown = tokio::spawn(async move {
            let _ = shutdown.changed().await;
            let _ = pump_shutdown_tx.send(true);
        });

        let pump_result = pump::run(device, transport, pump_shutdown_rx).await.map_err(CoordinatorError::from);

        forward_shutdown.abort();
        healthcheck.abort();
        guard.teardown().await;
        tracing::info!("tunnel torn down");

        pump_result
    }

    async fn healthcheck_loop(identifier: String, control: Arc<dyn ControlChannel>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next_in = OsRng.gen_range(MIN_HEALTHCHECK_SECS..=MAX_HEALTHCHECK_SECS);
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(Duration::from_secs(next_in)) => {}
            }
            if let Err(error) = control.authenticate(&identifier, None, None, None).await {
                tracing::warn!(%error, "healthcheck re-authentication failed, server may have lost the session");
            }
        }
    }
}
