//! Wire codecs for the PORT and TYPHOON protocols (spec §4.2–§4.4).
//!
//! Everything here is pure encode/decode over byte buffers: no sockets, no
//! timers. `seaside-transport` drives these codecs over actual connections
//! and owns the TYPHOON decay loop.

mod config;
mod error;
mod flags;
pub mod port;
pub mod rtt;
pub mod typhoon;

pub use config::{PortConfig, TyphoonConfig};
pub use error::ProtocolError;
pub use flags::ProtocolFlags;
