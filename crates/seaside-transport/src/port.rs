//! PORT transport: a TCP handshake connection followed by a dedicated
//! per-client TCP data connection (spec §4.3.2). Each `PortClient`/
//! `PortServer` owns exactly one live socket; there is no decay loop here
//! since TCP already provides reliability and liveness detection.

use std::net::SocketAddr;
use std::time::Duration;

use seaside_crypto::{Asymmetric, Symmetric};
use seaside_protocol::port::{self, ClientInitHeader, DataFrame};
use seaside_protocol::{PortConfig, ProtocolFlags};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;

/// How long the listener waits for a client to open its data connection
/// after the handshake completes. Not a spec-named constant, just a sane
/// bound so a half-finished handshake can't pin a port open forever.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

fn apply_keepalive(stream: &TcpStream, config: &PortConfig) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(config.keepalive_idle)
        .with_interval(config.keepalive_interval)
        .with_retries(config.keepalive_count);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

async fn connect_with_keepalive(addr: SocketAddr, config: &PortConfig) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    apply_keepalive(&stream, config)?;
    Ok(stream)
}

async fn read_exact_vec(stream: &mut TcpStream, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn discard(stream: &mut TcpStream, len: usize) -> std::io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(())
}

/// Reads one DATA/TERM frame off `stream`, following PORT's two-envelope
/// framing: a fixed-size header envelope first (to learn the payload and
/// tail lengths), then the variable remainder.
async fn read_data_frame(stream: &mut TcpStream, cipher: &Symmetric) -> Result<Vec<u8>, TransportError> {
    let header_len = port::DATA_HEADER_LEN + seaside_crypto::SYMMETRIC_CIPHERTEXT_OVERHEAD;
    let header_envelope = read_exact_vec(stream, header_len).await?;
    let (flags, data_ct_len, tail_len) = port::parse_data_header(cipher, &header_envelope)?;

    if flags == ProtocolFlags::TERM {
        discard(stream, tail_len).await?;
        return Err(TransportError::Terminated);
    }

    let payload_envelope = read_exact_vec(stream, data_ct_len).await?;
    discard(stream, tail_len).await?;
    match port::parse_data_payload(cipher, flags, &payload_envelope)? {
        DataFrame::Data(payload) => Ok(payload),
        DataFrame::Term => Err(TransportError::Terminated),
    }
}

async fn write_data_frame(stream: &mut TcpStream, cipher: &Symmetric, payload: Option<&[u8]>, max_tail: usize) -> Result<(), TransportError> {
    let wire = port::build_data(cipher, payload, max_tail);
    stream.write_all(&wire).await?;
    Ok(())
}

/// Client-side PORT endpoint (spec §4.3.2's client handshake and §4.5's
/// data-plane read/write contract).
pub struct PortClient {
    data_stream: TcpStream,
    cipher: Symmetric,
    config: PortConfig,
    pub user_id: u16,
}

impl PortClient {
    pub async fn connect(addr: SocketAddr, listener_public: &Asymmetric, client_name: &str, token: &[u8], config: PortConfig) -> Result<Self, TransportError> {
        let mut handshake_stream = TcpStream::connect(addr).await?;
        apply_keepalive(&handshake_stream, &config)?;

        let (cipher, wire) = port::build_client_init(listener_public, client_name, token, config.max_tail)?;
        handshake_stream.write_all(&wire).await?;

        let header_len = port::SERVER_INIT_HEADER_LEN + seaside_crypto::SYMMETRIC_CIPHERTEXT_OVERHEAD;
        let envelope = read_exact_vec(&mut handshake_stream, header_len).await?;
        let server_init = port::parse_server_init(&cipher, &envelope)?;
        discard(&mut handshake_stream, server_init.tail_len).await?;
        drop(handshake_stream);

        if server_init.status != 0 {
            return Err(TransportError::Initialization(format!("listener rejected session with status {}", server_init.status)));
        }

        let data_stream = connect_with_keepalive(SocketAddr::new(addr.ip(), server_init.user_id), &config).await?;

        Ok(Self { data_stream, cipher, config, user_id: server_init.user_id })
    }

    pub async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        read_data_frame(&mut self.data_stream, &self.cipher).await
    }

    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_data_frame(&mut self.data_stream, &self.cipher, Some(payload), self.config.max_tail).await
    }

    pub async fn close(mut self) -> Result<(), TransportError> {
        let result = write_data_frame(&mut self.data_stream, &self.cipher, None, self.config.max_tail).await;
        let _ = self.data_stream.shutdown().await;
        result
    }
}

/// Server-side PORT endpoint, bound to the per-client data connection
/// handed out by `PortListener::accept`.
pub struct PortServer {
    data_stream: TcpStream,
    cipher: Symmetric,
    config: PortConfig,
}

impl PortServer {
    pub async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        read_data_frame(&mut self.data_stream, &self.cipher).await
    }

    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_data_frame(&mut self.data_stream, &self.cipher, Some(payload), self.config.max_tail).await
    }

    pub async fn close(mut self) -> Result<(), TransportError> {
        let result = write_data_frame(&mut self.data_stream, &self.cipher, None, self.config.max_tail).await;
        let _ = self.data_stream.shutdown().await;
        result
    }
}

/// Outcome of one accepted PORT handshake (spec §4.7): the caller spawns a
/// per-client task around `server`.
pub struct AcceptedPortSession {
    pub server: PortServer,
    pub user_id: u16,
    pub client_name: String,
    pub token: Vec<u8>,
}

/// Listener counterpart (spec §4.7). PORT has no token→session map of its
/// own: unlike TYPHOON, a token collision can't arise from UDP source-port
/// reuse, since every PORT client gets a fresh handshake connection and a
/// fresh ephemeral data port.
pub struct PortListener {
    handshake_listener: TcpListener,
    config: PortConfig,
}

impl PortListener {
    pub async fn bind(addr: SocketAddr, config: PortConfig) -> Result<Self, TransportError> {
        let handshake_listener = TcpListener::bind(addr).await?;
        Ok(Self { handshake_listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.handshake_listener.local_addr()
    }

    /// Accepts and completes exactly one client handshake. Callers loop on
    /// this, spawning one task per returned session.
    pub async fn accept(&self, listener_keys: &Asymmetric, mut authorize: impl FnMut(&str, &[u8]) -> u8) -> Result<AcceptedPortSession, TransportError> {
        let (mut handshake_stream, peer_addr) = self.handshake_listener.accept().await?;
        apply_keepalive(&handshake_stream, &self.config)?;

        let envelope = read_exact_vec(&mut handshake_stream, port::CLIENT_INIT_ENVELOPE_LEN).await?;
        let (cipher, ClientInitHeader { client_name, token_ct_len, tail_len }) = port::open_client_init_envelope(listener_keys, &envelope)?;

        let rest = read_exact_vec(&mut handshake_stream, token_ct_len + tail_len).await?;
        let token = port::finish_client_init(&cipher, &rest[..token_ct_len])?;

        let status = authorize(&client_name, &token);
        if status != 0 {
            let wire = port::build_server_init(&cipher, status, 0, self.config.max_tail);
            let _ = handshake_stream.write_all(&wire).await;
            return Err(TransportError::Initialization(format!("authorization callback returned status {status}")));
        }

        let data_listener = TcpListener::bind(SocketAddr::new(self.handshake_listener.local_addr()?.ip(), 0)).await?;
        let user_id = data_listener.local_addr()?.port();

        let wire = port::build_server_init(&cipher, 0, user_id, self.config.max_tail);
        handshake_stream.write_all(&wire).await?;
        drop(handshake_stream);

        let (data_stream, data_peer) = tokio::time::timeout(DATA_ACCEPT_TIMEOUT, data_listener.accept())
            .await
            .map_err(|_elapsed| TransportError::TimedOut)??;
        if data_peer.ip() != peer_addr.ip() {
            tracing::warn!(expected = %peer_addr.ip(), got = %data_peer.ip(), "data connection from unexpected address");
        }
        apply_keepalive(&data_stream, &self.config)?;

        Ok(AcceptedPortSession {
            server: PortServer { data_stream, cipher, config: self.config.clone() },
            user_id,
            client_name,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_and_listener_complete_handshake_and_echo() {
        let listener_keys = Asymmetric::generate();
        let client_keys = Asymmetric::from_public(listener_keys.public_key());

        let listener = PortListener::bind("127.0.0.1:0".parse().unwrap(), PortConfig::default()).await.unwrap();
        let listener_addr = listener.local_addr().unwrap();

        let accept_fut = tokio::spawn(async move { listener.accept(&listener_keys, |_name, _token| 0).await });

        let mut client = PortClient::connect(listener_addr, &client_keys, "integration-test", b"token-bytes", PortConfig::default()).await.unwrap();

        let accepted = accept_fut.await.unwrap().unwrap();
        assert_eq!(accepted.client_name, "integration-test");
        assert_eq!(accepted.token, b"token-bytes");
        assert_eq!(accepted.user_id, client.user_id);
        let mut server = accepted.server;

        client.write(b"ping").await.unwrap();
        let received = server.read().await.unwrap();
        assert_eq!(received, b"ping");

        server.write(b"pong").await.unwrap();
        let echoed = client.read().await.unwrap();
        assert_eq!(echoed, b"pong");
    }

    #[tokio::test]
    async fn bad_token_is_rejected_with_status() {
        let listener_keys = Asymmetric::generate();
        let client_keys = Asymmetric::from_public(listener_keys.public_key());

        let listener = PortListener::bind("127.0.0.1:0".parse().unwrap(), PortConfig::default()).await.unwrap();
        let listener_addr = listener.local_addr().unwrap();

        let accept_fut = tokio::spawn(async move { listener.accept(&listener_keys, |_name, _token| 1).await });

        let result = PortClient::connect(listener_addr, &client_keys, "rejected", b"bad-token", PortConfig::default()).await;
        assert!(matches!(result, Err(TransportError::Initialization(_))));
        assert!(accept_fut.await.unwrap().is_err());
    }
}
