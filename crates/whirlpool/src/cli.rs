//! `whirlpool`'s command-line surface. Not named in spec.md (the listener
//! is only specified at the protocol level, §4.7), but every binary in
//! this workspace gets a real derive-based CLI rather than hardcoded
//! constants.

use std::net::IpAddr;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "whirlpool", version, about = "SeasideVPN caerulean listener")]
pub struct Cli {
    /// Address to bind both listeners on.
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// PORT transport listening port.
    #[arg(long, default_value_t = 8542)]
    pub port_port: u16,

    /// TYPHOON transport listening port.
    #[arg(long, default_value_t = 8587)]
    pub typhoon_port: u16,

    /// Listener's long-term X25519 private key seed, hex-encoded (64 bytes). Generated fresh if omitted.
    #[arg(long)]
    pub seed: Option<String>,

    /// Shared tunnel interface name.
    #[arg(short = 't', long, default_value = "whirltun")]
    pub tunnel_name: String,

    /// Tunnel subnet, e.g. `10.70.0.0`.
    #[arg(long, default_value = "10.70.0.0")]
    pub tunnel_network: std::net::Ipv4Addr,

    /// Host bits in the tunnel subnet (client pool size is `2^bits - 2`).
    #[arg(long, default_value_t = 8)]
    pub tunnel_host_bits: u32,

    /// Tunnel interface MTU.
    #[arg(long, default_value_t = 1500)]
    pub mtu: u16,
}
