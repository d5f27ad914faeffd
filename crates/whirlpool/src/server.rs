//! The listener itself (spec §4.7): accepts handshakes on both wire
//! protocols, dispatches each to a connection callback, and spawns one
//! task per accepted client that bridges its session to the shared
//! tunnel device.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tun::AsyncDevice;

use seaside_crypto::Asymmetric;
use seaside_protocol::{PortConfig, TyphoonConfig};
use seaside_transport::{PortListener, Session, TyphoonListener};

use crate::pool::AddressPool;
use crate::registry::Registry;

fn destination_of(packet: &[u8]) -> Option<Ipv4Addr> {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]))
}

/// Decides whether an incoming client is let in at all (spec §4.7's
/// "connection callback which returns a status code"). Admission policy
/// itself is explicitly out of scope (spec.md Non-goals); the default
/// here accepts every well-formed handshake, status 0.
pub fn accept_all(_client_name: &str, _token: &[u8]) -> u8 {
    0
}

/// Runs the PORT accept loop until the process is torn down. Each
/// accepted client gets its own task pumping between its session and the
/// shared tunnel device.
pub async fn run_port_listener(
    bind_addr: SocketAddr,
    listener_keys: Arc<Asymmetric>,
    config: PortConfig,
    device: Arc<Mutex<AsyncDevice>>,
    pool: Arc<Mutex<AddressPool>>,
    registry: Arc<Registry>,
) -> std::io::Result<()> {
    let listener = PortListener::bind(bind_addr, config).await.map_err(|error| std::io::Error::other(error.to_string()))?;
    tracing::info!(addr = %bind_addr, "PORT listener bound");

    loop {
        let accepted = match listener.accept(&listener_keys, accept_all).await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::debug!(%error, "PORT handshake failed");
                continue;
            }
        };

        let address = match pool.lock().await.allocate() {
            Ok(address) => address,
            Err(error) => {
                tracing::warn!(%error, "address pool exhausted, dropping client");
                continue;
            }
        };

        tracing::info!(client = %accepted.client_name, user_id = accepted.user_id, %address, "PORT client accepted");
        spawn_client(Session::Port(accepted.server), accepted.token, address, Arc::clone(&device), Arc::clone(&pool), Arc::clone(&registry));
    }
}

/// Runs the TYPHOON accept loop, same shape as [`run_port_listener`].
pub async fn run_typhoon_listener(
    bind_addr: SocketAddr,
    listener_keys: Asymmetric,
    config: TyphoonConfig,
    device: Arc<Mutex<AsyncDevice>>,
    pool: Arc<Mutex<AddressPool>>,
    registry: Arc<Registry>,
) -> std::io::Result<()> {
    let listener =
        Arc::new(TyphoonListener::bind(bind_addr, listener_keys, config).await.map_err(|error| std::io::Error::other(error.to_string()))?);
    tracing::info!(addr = %bind_addr, "TYPHOON listener bound");

    loop {
        let accepted = match listener.accept(accept_all).await {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::debug!(%error, "TYPHOON handshake failed");
                continue;
            }
        };

        let address = match pool.lock().await.allocate() {
            Ok(address) => address,
            Err(error) => {
                tracing::warn!(%error, "address pool exhausted, dropping client");
                continue;
            }
        };

        tracing::info!(client = %accepted.client_name, user_id = accepted.user_id, %address, "TYPHOON client accepted");
        spawn_client(Session::Typhoon(accepted.server), accepted.token, address, Arc::clone(&device), Arc::clone(&pool), Arc::clone(&registry));
    }
}

fn spawn_client(
    mut session: Session,
    token: Vec<u8>,
    address: Ipv4Addr,
    device: Arc<Mutex<AsyncDevice>>,
    pool: Arc<Mutex<AddressPool>>,
    registry: Arc<Registry>,
) {
    tokio::spawn(async move {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (downlink_tx, mut downlink_rx) = mpsc::channel::<Vec<u8>>(64);
        let session_id = registry.register(token.clone(), address, shutdown_tx, downlink_tx).await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                uplink = session.read() => {
                    match uplink {
                        Ok(packet) => {
                            let mut device = device.lock().await;
                            if let Err(error) = device.write_all(&packet).await {
                                tracing::warn!(%error, "failed writing uplink packet to shared tunnel");
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::info!(%error, %address, "session ended");
                            break;
                        }
                    }
                }

                downlink = downlink_rx.recv() => {
                    match downlink {
                        Some(packet) => {
                            if let Err(error) = session.write(&packet).await {
                                tracing::warn!(%error, "failed writing downlink packet to session");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = session.close().await;
        registry.deregister(&token, session_id).await;
        pool.lock().await.release(address);
    });
}

/// Reads packets off the shared tunnel device and routes each one to the
/// session whose pool-assigned address matches the packet's destination
/// (the listener-side counterpart of the client's downlink: spec §4.5's
/// pump reversed, fanned out over every live session instead of one).
pub async fn run_tunnel_reader(device: Arc<Mutex<AsyncDevice>>, registry: Arc<Registry>) {
    let mut buf = vec![0u8; 65535];
    loop {
        let read = {
            let mut device = device.lock().await;
            device.read(&mut buf).await
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                if let Some(destination) = destination_of(&buf[..n]) {
                    registry.route(destination, buf[..n].to_vec()).await;
                }
            }
            Err(error) => {
                tracing::error!(%error, "shared tunnel read failed");
                break;
            }
        }
    }
}
