//! Discovers the host's current default route so firewall rules can
//! single out "traffic that would otherwise leave via the real NIC"
//! (spec §6.1, grounded on `sources/interaction/system.py`'s
//! `_get_default_interface`/`_get_default_route`).

use std::net::Ipv4Addr;

use crate::error::TunnelError;
use crate::process;

/// The network the host was on before the tunnel became the default
/// route: its interface name, IP, CIDR prefix length and MTU.
#[derive(Debug, Clone)]
pub struct DefaultInterface {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub mtu: u16,
}

/// Runs `ip -4 route get <peer>` and pulls the outgoing interface name out
/// of `... dev <iface> ...`. `peer` is the VPN node's address: this is the
/// route the control/data traffic to it already takes, which must stay
/// off the tunnel once it comes up (spec §6.1's "ACCEPT ... via the
/// original default interface" rule).
async fn discover_oif(peer: Ipv4Addr) -> Result<String, TunnelError> {
    let output = process::run("ip", &["-4", "route", "get", &peer.to_string()]).await?;
    let first_line = output.lines().next().unwrap_or_default();
    let tokens: Vec<&str> = first_line.split_whitespace().collect();
    tokens
        .iter()
        .position(|&t| t == "dev")
        .and_then(|i| tokens.get(i + 1))
        .map(|s| s.to_string())
        .ok_or_else(|| TunnelError::DefaultInterface(format!("no `dev` token in `ip route get {peer}` output: {first_line:?}")))
}

/// Runs `ip -4 addr show dev <iface>` and pulls the first `inet a.b.c.d/NN`.
async fn discover_address(iface: &str) -> Result<(Ipv4Addr, u8), TunnelError> {
    let output = process::run("ip", &["-4", "addr", "show", "dev", iface]).await?;
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("inet ") {
            let cidr = rest.split_whitespace().next().unwrap_or_default();
            if let Some((addr, prefix)) = cidr.split_once('/') {
                let address = addr.parse().map_err(|_| TunnelError::DefaultInterface(format!("bad address in `{cidr}`")))?;
                let prefix_len = prefix.parse().map_err(|_| TunnelError::DefaultInterface(format!("bad prefix in `{cidr}`")))?;
                return Ok((address, prefix_len));
            }
        }
    }
    Err(TunnelError::DefaultInterface(format!("no inet address found on {iface}")))
}

/// Runs `ip link show dev <iface>` and pulls the `mtu NNNN` field.
async fn discover_mtu(iface: &str) -> Result<u16, TunnelError> {
    let output = process::run("ip", &["link", "show", "dev", iface]).await?;
    let first_line = output.lines().next().unwrap_or_default();
    let tokens: Vec<&str> = first_line.split_whitespace().collect();
    tokens
        .iter()
        .position(|&t| t == "mtu")
        .and_then(|i| tokens.get(i + 1))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TunnelError::DefaultInterface(format!("no `mtu` token in `ip link show {iface}` output: {first_line:?}")))
}

/// Discovers the default interface carrying traffic to `peer`: its name,
/// address, CIDR and MTU (the tunnel device inherits this MTU, spec §6.1).
pub async fn discover(peer: Ipv4Addr) -> Result<DefaultInterface, TunnelError> {
    let name = discover_oif(peer).await?;
    let (address, prefix_len) = discover_address(&name).await?;
    let mtu = discover_mtu(&name).await?;
    Ok(DefaultInterface { name, address, prefix_len, mtu })
}
