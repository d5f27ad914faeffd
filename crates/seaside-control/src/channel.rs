//! The control RPC interface (spec §6.2): a remote procedure used
//! exclusively to mint sessions, named here only by its interface so the
//! coordinator can be agnostic to transport/wire details.

use async_trait::async_trait;

use crate::error::ControlError;

/// Everything a session coordinator needs to build a transport endpoint,
/// returned by a single `authenticate` RPC (spec §6.2 / §4.6 step 1).
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub public_key: [u8; 32],
    pub token: Vec<u8>,
    pub typhoon_port: u16,
    pub port_port: u16,
    pub dns: String,
}

/// A remote-procedure interface used exclusively to mint sessions
/// (spec §6.2). The one operation the core consumes is `authenticate`;
/// everything else about how sessions are administered server-side is
/// out of scope (spec.md Non-goals: "server admission policy").
///
/// `#[async_trait]` boxes the returned future so this trait stays object
/// safe — the coordinator holds it as `Arc<dyn ControlChannel>` since the
/// concrete channel implementation is chosen at startup, not compile time.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// `identifier` names the caller to the control plane; `api_key`,
    /// `name`, and `days` are optional session-shaping hints the server
    /// may use however it likes (quota, naming, expiry).
    async fn authenticate(
        &self,
        identifier: &str,
        api_key: Option<&str>,
        name: Option<&str>,
        days: Option<u32>,
    ) -> Result<AuthResponse, ControlError>;
}
