//! Command-line surface (spec §6.5): `--address`, `--port`, `--key`,
//! `--protocol`, `--link`, `--command`, `--version`. Derive-based clap
//! usage, learned from elsewhere in the pack rather than the teacher.

use std::net::IpAddr;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProtocolChoice {
    Port,
    Typhoon,
}

/// `algae`: the viridian VPN client (spec §4.6/§6.5).
#[derive(Debug, Parser)]
#[command(name = "algae", version, about = "SeasideVPN viridian client")]
pub struct Cli {
    /// Caerulean whirlpool node address. Mutually exclusive with `--link`.
    #[arg(short = 'a', long, conflicts_with = "link")]
    pub address: Option<IpAddr>,

    /// Control port on the whirlpool node.
    #[arg(short = 'p', long, default_value_t = 8543u16, conflicts_with = "link")]
    pub port: u16,

    /// Node owner's pre-shared public key, hex-encoded. Mutually exclusive with `--link`.
    #[arg(short = 'k', long, conflicts_with = "link")]
    pub key: Option<String>,

    /// Wire protocol to use for the data transport.
    #[arg(long, value_enum, default_value = "typhoon")]
    pub protocol: ProtocolChoice,

    /// A `seaside+<nodetype>://...` connection link, replacing `--address`/`--port`/`--key`.
    #[arg(short = 'l', long)]
    pub link: Option<String>,

    /// Run this command inside the tunnel once it's up; tear down when it exits.
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Tunnel interface name.
    #[arg(short = 't', long, default_value = "seatun")]
    pub tunnel_name: String,
}
