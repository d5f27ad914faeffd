//! The control RPC channel (spec §6.2) and connection link parsing
//! (spec §6.4): the out-of-band collaborators a session coordinator
//! consults before it ever touches the wire protocols.

mod channel;
mod error;
mod https;
mod link;

pub use channel::{AuthResponse, ControlChannel};
pub use error::ControlError;
pub use https::HttpsControlChannel;
pub use link::{parse as parse_link, ConnectionLink};
