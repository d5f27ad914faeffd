//! The OS tunnel device: creation, addressing, and the firewall/routing
//! rules that make it the default route for non-local traffic (spec §6.1).
//!
//! Everything here is an external collaborator in the spec's own words —
//! the wire protocols and pump don't care how the tunnel got configured,
//! only that `up()` hands back a readable/writable device and a guard that
//! undoes everything on shutdown.

mod default_iface;
mod device;
mod error;
mod firewall;
mod process;

pub use default_iface::DefaultInterface;
pub use device::{Tunnel, TunnelConfig, TunnelGuard};
pub use error::TunnelError;
