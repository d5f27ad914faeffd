//! TYPHOON transport: UDP handshake-with-retransmission plus the
//! steady-state decay loop (spec §4.4.2–§4.4.4). `TyphoonClient`,
//! `TyphoonServer`, and `TyphoonListener` are distinct concrete types that
//! happen to share an internal engine (`Shared`) — composition, not a
//! class hierarchy, per the design note on avoiding inheritance here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;
use seaside_crypto::{Asymmetric, Symmetric};
use seaside_protocol::rtt::{self, RttEstimator};
use seaside_protocol::typhoon::{self, TyphoonMessage};
use seaside_protocol::TyphoonConfig;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::TransportError;

const MAX_DATAGRAM: usize = 65535;

fn random_next_in(range: (Duration, Duration)) -> Duration {
    let (lo, hi) = range;
    if hi <= lo {
        return lo;
    }
    let span_ms = (hi - lo).as_millis() as u64;
    lo + Duration::from_millis(OsRng.gen_range(0..=span_ms))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

/// Everything a single TYPHOON endpoint needs after its handshake
/// completes: the connected socket, the session cipher, and the mutable
/// decay-loop/RTT state. Shared between the public endpoint handle and its
/// background decay task via `Arc`.
struct Shared {
    socket: UdpSocket,
    cipher: Symmetric,
    config: TyphoonConfig,
    role: Role,
    send_lock: Mutex<()>,
    shadowride: Mutex<Option<u32>>,
    rtt: Mutex<RttEstimator>,
    /// Only meaningful for `Role::Client`: the packet number the server's
    /// next HDSK must echo (spec §4.4.1's rejection rule, extended from
    /// the INIT exchange into steady state).
    expected_packet_number: Mutex<u32>,
    dead: AtomicBool,
}

impl Shared {
    async fn send_raw(&self, wire: &[u8]) -> Result<(), TransportError> {
        let _guard = self.send_lock.lock().await;
        self.socket.send(wire).await?;
        Ok(())
    }

    async fn send_hdsk(&self, packet_number: u32, next_in: Duration) -> Result<(), TransportError> {
        let wire = typhoon::build_hdsk(&self.cipher, packet_number, next_in, None, self.config.max_tail);
        self.send_raw(&wire).await
    }

    async fn send_data_or_shadowride(&self, payload: &[u8]) -> Result<(), TransportError> {
        let shadow = self.shadowride.lock().await.take();
        let wire = match shadow {
            Some(packet_number) => {
                let next_in = random_next_in(self.config.steady_next_in_range());
                typhoon::build_hdsk(&self.cipher, packet_number, next_in, Some(payload), self.config.max_tail)
            }
            None => typhoon::build_data(&self.cipher, payload, self.config.max_tail),
        };
        self.send_raw(&wire).await
    }

    async fn send_term(&self) -> Result<(), TransportError> {
        let wire = typhoon::build_term(&self.cipher, self.config.max_tail);
        self.send_raw(&wire).await
    }

    async fn current_rtt(&self) -> Duration {
        self.rtt.lock().await.rtt(&self.config)
    }

    async fn current_timeout(&self) -> Duration {
        self.rtt.lock().await.timeout(&self.config)
    }

    async fn sample_rtt(&self, last_sent_ms: u32, incoming_next_in: Duration) {
        let now_ms = rtt::packet_number_now();
        let sample = rtt::current_round_trip(now_ms, last_sent_ms, incoming_next_in.as_millis() as u32);
        self.rtt.lock().await.sample(sample);
    }
}

/// The per-endpoint keep-alive/retransmission task (spec §4.4.3). Runs for
/// the lifetime of the session; exits on shutdown, on a fresh incoming
/// event (restarting the outer wait with the new baseline), or once
/// `MAX_RETRIES` consecutive silent probes mark the endpoint dead.
async fn decay_loop(
    shared: Arc<Shared>,
    mut decay_rx: mpsc::UnboundedReceiver<(u32, Duration)>,
    mut shutdown: watch::Receiver<bool>,
    initial_next_in: Duration,
    initial_packet_number: u32,
) {
    let mut baseline_next_in = initial_next_in;
    // For `Role::Server` this is the packet number most recently received
    // from the client; the server's own probes echo it rather than minting
    // a fresh one, so the client's `expected_packet_number` check (set to
    // the number *it* sent) actually matches. `Role::Client` ignores this
    // and always mints its own.
    let mut baseline_packet_number = initial_packet_number;

    'outer: loop {
        if *shutdown.borrow() {
            return;
        }

        let wait = baseline_next_in.saturating_sub(shared.current_rtt().await);
        tokio::select! {
            _ = shutdown.changed() => return,
            event = decay_rx.recv() => match event {
                Some((packet_number, next_in)) => { baseline_next_in = next_in; baseline_packet_number = packet_number; continue 'outer; }
                None => return,
            },
            _ = tokio::time::sleep(wait) => {}
        }

        let mut retries = 0u32;
        loop {
            if retries >= shared.config.max_retries {
                shared.dead.store(true, Ordering::SeqCst);
                return;
            }

            let probe_packet_number = match shared.role {
                Role::Client => rtt::packet_number_now(),
                Role::Server => baseline_packet_number,
            };
            *shared.shadowride.lock().await = Some(probe_packet_number);
            if shared.role == Role::Client {
                *shared.expected_packet_number.lock().await = probe_packet_number;
            }

            let rtt_now = shared.current_rtt().await;
            tokio::select! {
                _ = shutdown.changed() => return,
                event = decay_rx.recv() => match event {
                    Some((packet_number, next_in)) => { baseline_next_in = next_in; baseline_packet_number = packet_number; continue 'outer; }
                    None => return,
                },
                _ = tokio::time::sleep(rtt_now * 2) => {}
            }

            shared.shadowride.lock().await.take();
            let next_in = random_next_in(shared.config.steady_next_in_range());
            let sent_at = rtt::packet_number_now();
            if let Err(error) = shared.send_hdsk(probe_packet_number, next_in).await {
                tracing::warn!(%error, "decay loop failed to send keep-alive");
            }

            let timeout_dur = shared.current_timeout().await;
            tokio::select! {
                _ = shutdown.changed() => return,
                event = decay_rx.recv() => match event {
                    Some((packet_number, got_next_in)) => {
                        shared.sample_rtt(sent_at, got_next_in).await;
                        baseline_next_in = got_next_in;
                        baseline_packet_number = packet_number;
                        continue 'outer;
                    }
                    None => return,
                },
                _ = tokio::time::sleep(next_in + rtt_now + timeout_dur) => {}
            }

            retries += 1;
        }
    }
}

async fn read_inner(shared: &Arc<Shared>, decay_tx: &mpsc::UnboundedSender<(u32, Duration)>) -> Result<Vec<u8>, TransportError> {
    if shared.dead.load(Ordering::SeqCst) {
        return Err(TransportError::TimedOut);
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let n = shared.socket.recv(&mut buf).await?;
        let parsed = match shared.role {
            Role::Client => {
                let expected = *shared.expected_packet_number.lock().await;
                typhoon::parse_server_message(&shared.cipher, &buf[..n], expected, &shared.config)
            }
            Role::Server => typhoon::parse_client_message(&shared.cipher, &buf[..n], &shared.config),
        };
        match parsed {
            Ok(TyphoonMessage::Data(payload)) => return Ok(payload),
            Ok(TyphoonMessage::HandshakeData { packet_number, next_in, data }) => {
                let _ = decay_tx.send((packet_number, next_in));
                return Ok(data);
            }
            Ok(TyphoonMessage::Handshake { packet_number, next_in }) => {
                let _ = decay_tx.send((packet_number, next_in));
                continue;
            }
            Ok(TyphoonMessage::Term) => return Err(TransportError::Terminated),
            Err(error) => {
                tracing::debug!(%error, "dropping malformed typhoon datagram");
                continue;
            }
        }
    }
}

fn spawn_decay(
    shared: Arc<Shared>,
    initial_next_in: Duration,
    initial_packet_number: u32,
) -> (mpsc::UnboundedSender<(u32, Duration)>, watch::Sender<bool>, JoinHandle<()>) {
    let (decay_tx, decay_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(decay_loop(shared, decay_rx, shutdown_rx, initial_next_in, initial_packet_number));
    (decay_tx, shutdown_tx, task)
}

/// Client-side TYPHOON endpoint (spec §4.4.2's client steps, §4.4.3's
/// decay loop).
pub struct TyphoonClient {
    shared: Arc<Shared>,
    decay_tx: mpsc::UnboundedSender<(u32, Duration)>,
    shutdown_tx: watch::Sender<bool>,
    decay_task: JoinHandle<()>,
    pub user_id: u16,
}

impl TyphoonClient {
    pub async fn connect(peer_addr: SocketAddr, listener_public: &Asymmetric, client_name: &str, token: &[u8], config: TyphoonConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(peer_addr).await?;

        let packet_number0 = rtt::packet_number_now();
        let next_in0 = random_next_in(config.initial_next_in_range());
        let default_estimate = RttEstimator::new();
        let wait = next_in0 + default_estimate.rtt(&config) * 2 + default_estimate.timeout(&config);

        // Spec §4.4.2 step 4: a retransmitted Client INIT keeps the same
        // packet_number (and session key) and only draws a fresh tail —
        // the ephemeral session is established once, here, not per attempt.
        let (cipher, hidden_public, mut wire) =
            typhoon::build_client_init(listener_public, packet_number0, client_name, next_in0, token, config.max_tail)?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut attempt = 0u32;
        let server_init = loop {
            socket.send(&wire).await?;

            match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
                Ok(Ok(n)) => match typhoon::parse_server_init(&cipher, &buf[..n], packet_number0, &config) {
                    Ok(parsed) => break parsed,
                    Err(error) => tracing::debug!(%error, "dropping malformed server init"),
                },
                Ok(Err(io_error)) => return Err(io_error.into()),
                Err(_elapsed) => {}
            }

            attempt += 1;
            if attempt > config.max_retries {
                return Err(TransportError::TimedOut);
            }
            wire = typhoon::retransmit_client_init(&cipher, &hidden_public, packet_number0, client_name, next_in0, token, config.max_tail)?;
        };

        if server_init.status != 0 {
            return Err(TransportError::Initialization(format!("listener rejected session with status {}", server_init.status)));
        }

        socket.connect(SocketAddr::new(peer_addr.ip(), server_init.user_id)).await?;

        let shared = Arc::new(Shared {
            socket,
            cipher,
            config,
            role: Role::Client,
            send_lock: Mutex::new(()),
            shadowride: Mutex::new(None),
            rtt: Mutex::new(RttEstimator::new()),
            expected_packet_number: Mutex::new(packet_number0),
            dead: AtomicBool::new(false),
        });
        let (decay_tx, shutdown_tx, decay_task) = spawn_decay(Arc::clone(&shared), server_init.next_in, packet_number0);

        Ok(Self { shared, decay_tx, shutdown_tx, decay_task, user_id: server_init.user_id })
    }

    pub async fn read(&self) -> Result<Vec<u8>, TransportError> {
        read_inner(&self.shared, &self.decay_tx).await
    }

    pub async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.shared.send_data_or_shadowride(payload).await
    }

    pub async fn close(self) -> Result<(), TransportError> {
        let _ = self.shutdown_tx.send(true);
        let result = self.shared.send_term().await;
        self.decay_task.abort();
        result
    }
}

/// Server-side TYPHOON endpoint bound to a dedicated per-user socket
/// (spec §4.4.2's listener steps 3–5).
pub struct TyphoonServer {
    shared: Arc<Shared>,
    decay_tx: mpsc::UnboundedSender<(u32, Duration)>,
    shutdown_tx: watch::Sender<bool>,
    decay_task: JoinHandle<()>,
}

impl TyphoonServer {
    pub async fn read(&self) -> Result<Vec<u8>, TransportError> {
        read_inner(&self.shared, &self.decay_tx).await
    }

    pub async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.shared.send_data_or_shadowride(payload).await
    }

    pub async fn close(self) -> Result<(), TransportError> {
        let _ = self.shutdown_tx.send(true);
        let result = self.shared.send_term().await;
        self.decay_task.abort();
        result
    }
}

/// Listener counterpart (spec §4.7): accepts Client INITs on a single
/// bound socket, spawns a dedicated per-user socket and `TyphoonServer`
/// for each, and evicts any prior session using the same token.
pub struct TyphoonListener {
    socket: UdpSocket,
    listener_keys: Asymmetric,
    config: TyphoonConfig,
    sessions: Mutex<HashMap<Vec<u8>, watch::Sender<bool>>>,
}

/// Outcome of one accepted handshake, handed to the caller (`whirlpool`'s
/// accept loop) to drive its own per-user task and bookkeeping.
pub struct AcceptedSession {
    pub server: TyphoonServer,
    pub user_id: u16,
    pub client_name: String,
    pub token: Vec<u8>,
}

impl TyphoonListener {
    pub async fn bind(addr: SocketAddr, listener_keys: Asymmetric, config: TyphoonConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, listener_keys, config, sessions: Mutex::new(HashMap::new()) })
    }

    /// Waits for and completes exactly one client handshake. Callers loop
    /// on this, spawning a task per returned session (spec §5: "multi-
    /// client listeners spawn one task per client").
    pub async fn accept(&self, mut authorize: impl FnMut(&str, &[u8]) -> u8) -> Result<AcceptedSession, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (cipher, client, peer_addr) = loop {
            let (n, peer_addr) = self.socket.recv_from(&mut buf).await?;
            match typhoon::parse_client_init(&self.listener_keys, &buf[..n], &self.config) {
                Ok((cipher, client)) => break (cipher, client, peer_addr),
                Err(error) => tracing::debug!(%error, "dropping malformed client init"),
            }
        };

        if let Some(previous) = self.sessions.lock().await.remove(&client.token) {
            let _ = previous.send(true);
        }

        let status = authorize(&client.client_name, &client.token);
        if status != 0 {
            let wire = typhoon::build_server_init(&cipher, client.packet_number, status, 0, client.next_in, self.config.max_tail);
            let _ = self.socket.send_to(&wire, peer_addr).await;
            return Err(TransportError::Initialization(format!("authorization callback returned status {status}")));
        }

        let data_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        data_socket.connect(peer_addr).await?;
        let user_id = data_socket.local_addr()?.port();

        tokio::time::sleep(client.next_in).await;

        let default_estimate = RttEstimator::new();
        let wait = client.next_in + default_estimate.rtt(&self.config) * 2 + default_estimate.timeout(&self.config);
        let mut ack_buf = vec![0u8; MAX_DATAGRAM];
        let mut attempt = 0u32;
        let initial_next_in;
        loop {
            let wire = typhoon::build_server_init(&cipher, client.packet_number, 0, user_id, client.next_in, self.config.max_tail);
            let _ = self.socket.send_to(&wire, peer_addr).await;

            match tokio::time::timeout(wait, data_socket.recv(&mut ack_buf)).await {
                Ok(Ok(n)) => match typhoon::parse_client_message(&cipher, &ack_buf[..n], &self.config) {
                    Ok(TyphoonMessage::Handshake { next_in, .. }) | Ok(TyphoonMessage::HandshakeData { next_in, .. }) => {
                        initial_next_in = next_in;
                        break;
                    }
                    Ok(_) => {
                        initial_next_in = self.config.min_next_in;
                        break;
                    }
                    Err(error) => tracing::debug!(%error, "dropping malformed ack"),
                },
                Ok(Err(io_error)) => return Err(io_error.into()),
                Err(_elapsed) => {}
            }

            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(TransportError::TimedOut);
            }
        }

        let shared = Arc::new(Shared {
            socket: data_socket,
            cipher,
            config: self.config.clone(),
            role: Role::Server,
            send_lock: Mutex::new(()),
            shadowride: Mutex::new(None),
            rtt: Mutex::new(RttEstimator::new()),
            expected_packet_number: Mutex::new(0),
            dead: AtomicBool::new(false),
        });
        let (decay_tx, shutdown_tx, decay_task) = spawn_decay(Arc::clone(&shared), initial_next_in, client.packet_number);
        self.sessions.lock().await.insert(client.token.clone(), shutdown_tx.clone());

        Ok(AcceptedSession {
            server: TyphoonServer { shared, decay_tx, shutdown_tx, decay_task },
            user_id,
            client_name: client.client_name,
            token: client.token,
        })
    }

    /// Closes every live session and the listening socket (spec §4.7).
    pub async fn close(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, shutdown_tx) in sessions.drain() {
            let _ = shutdown_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_next_in_respects_bounds() {
        let range = (Duration::from_millis(64), Duration::from_millis(256));
        for _ in 0..100 {
            let sample = random_next_in(range);
            assert!(sample >= range.0 && sample <= range.1);
        }
    }

    #[test]
    fn random_next_in_degenerate_range_returns_floor() {
        let point = Duration::from_millis(100);
        assert_eq!(random_next_in((point, point)), point);
    }

    #[tokio::test]
    async fn client_and_listener_complete_handshake_and_echo() {
        let listener_keys = Asymmetric::generate();
        let client_keys = Asymmetric::from_public(listener_keys.public_key());

        let listener = TyphoonListener::bind("127.0.0.1:0".parse().unwrap(), listener_keys, TyphoonConfig::default()).await.unwrap();
        let listener_addr = listener.socket.local_addr().unwrap();

        let accept_fut = tokio::spawn(async move { listener.accept(|_name, _token| 0).await });

        let client = TyphoonClient::connect(listener_addr, &client_keys, "integration-test", b"token-bytes", TyphoonConfig::default()).await.unwrap();

        let accepted = accept_fut.await.unwrap().unwrap();
        assert_eq!(accepted.client_name, "integration-test");
        assert_eq!(accepted.token, b"token-bytes");
        assert_eq!(accepted.user_id, client.user_id);

        client.write(b"ping").await.unwrap();
        let received = accepted.server.read().await.unwrap();
        assert_eq!(received, b"ping");

        accepted.server.write(b"pong").await.unwrap();
        let echoed = client.read().await.unwrap();
        assert_eq!(echoed, b"pong");
    }
}
