//! Firewall (iptables mangle table) and routing (`ip rule`/`ip route`)
//! rules that steer non-local, non-VPN-control traffic into the tunnel
//! (spec §6.1). Grounded on `sources/interaction/system.py`'s
//! `_setup_iptables_rules`/`_reset_iptables_rules` and `Tunnel.up`/`down`,
//! translated from the `iptc`/`pyroute2` bindings it uses to shelling out
//! to `ip`/`iptables` (see `process.rs` for why).

use std::net::Ipv4Addr;

use crate::default_iface::DefaultInterface;
use crate::error::TunnelError;
use crate::process::{run, run_best_effort};

const CHAINS: [&str; 2] = ["OUTPUT", "FORWARD"];

fn network_address(address: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    Ipv4Addr::from(u32::from(address) & mask)
}

/// Inserts the three mangle-table rules described in spec §6.1 into both
/// `OUTPUT` and `FORWARD`: ACCEPT traffic to the VPN node itself (so
/// control traffic isn't captured), MARK everything else leaving via the
/// default interface for a destination outside the host's own subnet, and
/// ACCEPT that same marked traffic.
///
/// Rules are inserted one at a time at position 1, in the order
/// accept-peer / mark / accept-marked, matching `python-iptables`'
/// `insert_rule`'s default-position-0 behaviour in the original: each
/// later insert pushes the earlier ones down, so the final top-to-bottom
/// order is accept-marked, mark, accept-peer.
pub async fn install(peer: Ipv4Addr, sva_mark: u32, default_iface: &DefaultInterface) -> Result<(), TunnelError> {
    let network = network_address(default_iface.address, default_iface.prefix_len);
    let not_local_net = format!("!{network}/{}", default_iface.prefix_len);
    let mark = sva_mark.to_string();

    for chain in CHAINS {
        run(
            "iptables",
            &["-t", "mangle", "-I", chain, "1", "-o", &default_iface.name, "-d", &not_local_net, "-j", "ACCEPT"],
        )
        .await?;
        run(
            "iptables",
            &["-t", "mangle", "-I", chain, "1", "-o", &default_iface.name, "-d", &not_local_net, "-j", "MARK", "--set-mark", &mark],
        )
        .await?;
        let peer_addr = peer.to_string();
        run("iptables", &["-t", "mangle", "-I", chain, "1", "-o", &default_iface.name, "-d", &peer_addr, "-j", "ACCEPT"]).await?;
    }

    run("ip", &["rule", "add", "fwmark", &mark, "table", &mark]).await?;
    Ok(())
}

/// Removes exactly what [`install`] added, in reverse order. Best-effort:
/// a rule that's already gone (e.g. a prior teardown was interrupted) must
/// not block the rest of teardown (spec §7, "OS error ... logged during
/// shutdown").
pub async fn remove(peer: Ipv4Addr, sva_mark: u32, default_iface: &DefaultInterface) {
    let network = network_address(default_iface.address, default_iface.prefix_len);
    let not_local_net = format!("!{network}/{}", default_iface.prefix_len);
    let mark = sva_mark.to_string();

    run_best_effort("ip", &["rule", "del", "fwmark", &mark, "table", &mark]).await;

    for chain in CHAINS {
        let peer_addr = peer.to_string();
        run_best_effort("iptables", &["-t", "mangle", "-D", chain, "-o", &default_iface.name, "-d", &peer_addr, "-j", "ACCEPT"]).await;
        run_best_effort(
            "iptables",
            &["-t", "mangle", "-D", chain, "-o", &default_iface.name, "-d", &not_local_net, "-j", "MARK", "--set-mark", &mark],
        )
        .await;
        run_best_effort("iptables", &["-t", "mangle", "-D", chain, "-o", &default_iface.name, "-d", &not_local_net, "-j", "ACCEPT"]).await;
    }
}

/// Snapshot of the routes in table `sva_mark` before this session
/// overwrites them with the tunnel default route (spec testable property
/// 10: "ip-rule state match the pre-session snapshot exactly").
pub struct RouteSnapshot {
    sva_mark: u32,
    routes: Vec<String>,
}

/// Captures `ip route show table <sva_mark>` so it can be restored later.
pub async fn snapshot_routes(sva_mark: u32) -> Result<RouteSnapshot, TunnelError> {
    let mark = sva_mark.to_string();
    let output = run("ip", &["route", "show", "table", &mark]).await.unwrap_or_default();
    let routes = output.lines().map(str::to_owned).collect();
    Ok(RouteSnapshot { sva_mark, routes })
}

/// Points table `sva_mark`'s default route at the tunnel device.
pub async fn set_tunnel_default_route(sva_mark: u32, tunnel_name: &str, tunnel_address: Ipv4Addr) -> Result<(), TunnelError> {
    let mark = sva_mark.to_string();
    let gateway = tunnel_address.to_string();
    run("ip", &["route", "flush", "table", &mark]).await.ok();
    run("ip", &["route", "add", "table", &mark, "default", "via", &gateway, "dev", tunnel_name]).await?;
    Ok(())
}

/// Restores exactly the routes captured by [`snapshot_routes`], flushing
/// whatever the session installed first.
pub async fn restore_routes(snapshot: RouteSnapshot) {
    let mark = snapshot.sva_mark.to_string();
    run_best_effort("ip", &["route", "flush", "table", &mark]).await;
    for route in snapshot.routes {
        let mut args: Vec<&str> = vec!["route", "add", "table", &mark];
        args.extend(route.split_whitespace());
        run_best_effort("ip", &args).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_address_masks_host_bits() {
        let addr: Ipv4Addr = "10.20.30.40".parse().unwrap();
        assert_eq!(network_address(addr, 24), "10.20.30.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(network_address(addr, 16), "10.20.0.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(network_address(addr, 0), "0.0.0.0".parse::<Ipv4Addr>().unwrap());
    }
}
