//! Socket-owning transports for PORT and TYPHOON (spec §4.3–§4.5).
//!
//! `seaside-protocol` only knows how to build and parse byte buffers; this
//! crate drives those codecs over real TCP/UDP sockets, runs TYPHOON's
//! decay loop, and exposes both transports behind one capability set so
//! the coordinator and listener don't need to know which wire protocol a
//! given session actually uses (spec §9: a tagged union, not a class
//! hierarchy, since Client/Server and PORT/TYPHOON split along different
//! axes that inheritance would tangle together).

mod error;
pub mod port;
pub mod typhoon;

pub use error::TransportError;
pub use port::{AcceptedPortSession, PortClient, PortListener, PortServer};
pub use typhoon::{AcceptedSession as AcceptedTyphoonSession, TyphoonClient, TyphoonListener, TyphoonServer};

/// A connected client-side endpoint, regardless of which wire protocol
/// carries it. The coordinator (spec §4.6) holds one of these without
/// caring which variant it got.
pub enum Transport {
    Port(PortClient),
    Typhoon(TyphoonClient),
}

impl Transport {
    pub async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        match self {
            Transport::Port(client) => client.read().await,
            Transport::Typhoon(client) => client.read().await,
        }
    }

    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match self {
            Transport::Port(client) => client.write(payload).await,
            Transport::Typhoon(client) => client.write(payload).await,
        }
    }

    pub async fn close(self) -> Result<(), TransportError> {
        match self {
            Transport::Port(client) => client.close().await,
            Transport::Typhoon(client) => client.close().await,
        }
    }
}

/// A connected server-side endpoint handed to a per-client task by either
/// listener (spec §4.7).
pub enum Session {
    Port(PortServer),
    Typhoon(TyphoonServer),
}

impl Session {
    pub async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        match self {
            Session::Port(server) => server.read().await,
            Session::Typhoon(server) => server.read().await,
        }
    }

    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match self {
            Session::Port(server) => server.write(payload).await,
            Session::Typhoon(server) => server.write(payload).await,
        }
    }

    pub async fn close(self) -> Result<(), TransportError> {
        match self {
            Session::Port(server) => server.close().await,
            Session::Typhoon(server) => server.close().await,
        }
    }
}
