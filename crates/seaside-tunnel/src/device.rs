//! The layer-3 tunnel device itself: a `tun` interface sized and addressed
//! per spec §6.1, plus the firewall/routing rules that make it the default
//! route for non-local traffic. Grounded on `sources/interaction/system.py`
//! (`Tunnel.__init__`/`up`/`down`/`delete`) for the sequencing, and on the
//! pack's `AyaanArshad0-ghost_tunnel` for the `tun` crate's async API.

use std::io;
use std::net::Ipv4Addr;

use tun::Configuration;

use crate::default_iface::{self, DefaultInterface};
use crate::error::TunnelError;
use crate::firewall::{self, RouteSnapshot};
use crate::process::run_best_effort;

/// Tunnel identity and addressing, the inputs an operator chooses
/// (spec §6.1: "configurable with an IPv4 address and CIDR ... and an SVA").
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub name: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub sva_mark: u32,
}

fn octets(addr: Ipv4Addr) -> (u8, u8, u8, u8) {
    let [a, b, c, d] = addr.octets();
    (a, b, c, d)
}

/// A created-but-not-yet-`up` tunnel device. Its MTU is copied from the
/// host's current default interface (spec §6.1), discovered by inspecting
/// the route to `peer` before the tunnel exists to shadow it.
pub struct Tunnel {
    device: tun::AsyncDevice,
    config: TunnelConfig,
    peer: Ipv4Addr,
    default_iface: DefaultInterface,
}

impl Tunnel {
    pub async fn create(config: TunnelConfig, peer: Ipv4Addr) -> Result<Self, TunnelError> {
        let default_iface = default_iface::discover(peer).await?;

        let mut tun_config = Configuration::default();
        tun_config
            .name(&config.name)
            .address(config.address)
            .netmask(octets(config.netmask))
            .mtu(default_iface.mtu as i32)
            .up();
        #[cfg(target_os = "linux")]
        tun_config.platform(|platform_config| {
            platform_config.packet_information(false);
        });

        let device = tun::create_as_async(&tun_config).map_err(|error| TunnelError::Create(io::Error::other(error.to_string())))?;

        tracing::info!(name = %config.name, mtu = default_iface.mtu, "tunnel device created");
        Ok(Self { device, config, peer, default_iface })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.config.address
    }

    pub fn mtu(&self) -> u16 {
        self.default_iface.mtu
    }

    /// Installs the firewall/routing rules that make this tunnel the
    /// default route for non-local traffic (spec §6.1), and hands back the
    /// raw device (for the pump to read/write IP packets from) alongside a
    /// [`TunnelGuard`] the pump calls at shutdown to reverse everything.
    pub async fn up(self) -> Result<(tun::AsyncDevice, TunnelGuard), TunnelError> {
        firewall::install(self.peer, self.config.sva_mark, &self.default_iface).await?;
        let route_snapshot = firewall::snapshot_routes(self.config.sva_mark).await?;
        firewall::set_tunnel_default_route(self.config.sva_mark, &self.config.name, self.config.address).await?;

        tracing::info!(name = %self.config.name, "tunnel up, default route via tunnel");
        let guard = TunnelGuard {
            name: self.config.name,
            sva_mark: self.config.sva_mark,
            peer: self.peer,
            default_iface: self.default_iface,
            route_snapshot,
        };
        Ok((self.device, guard))
    }
}

/// Teardown handle returned by [`Tunnel::up`]. Reverses the firewall and
/// routing rules and deletes the interface — spec §2's combined
/// "tunnel.down()+delete()" shutdown step, since nothing in this design
/// ever calls one without the other.
pub struct TunnelGuard {
    name: String,
    sva_mark: u32,
    peer: Ipv4Addr,
    default_iface: DefaultInterface,
    route_snapshot: RouteSnapshot,
}

impl TunnelGuard {
    pub async fn teardown(self) {
        firewall::remove(self.peer, self.sva_mark, &self.default_iface).await;
        firewall::restore_routes(self.route_snapshot).await;
        run_best_effort("ip", &["link", "delete", &self.name]).await;
        tracing::info!(name = %self.name, "tunnel torn down and deleted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octets_roundtrip() {
        let addr: Ipv4Addr = "10.70.0.1".parse().unwrap();
        assert_eq!(octets(addr), (10, 70, 0, 1));
    }
}
