//! The bidirectional tunnel↔transport forwarder (spec §4.5). Owns the
//! tunnel device fd for the whole session; the coordinator never touches
//! it directly once the pump has started.
//!
//! Grounded on `sources/viridian.py`'s uplink/downlink loop, re-expressed
//! as two cooperatively cancelled tokio tasks behind a `tokio::select!`
//! that guarantees scoped teardown on every exit path (normal,
//! cancellation, or error) per spec §4.5's closing paragraph.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tun::AsyncDevice;

use seaside_transport::Transport;

/// Runs the uplink/downlink pump until the transport reports termination,
/// an unrecoverable error occurs, or `shutdown` fires. Always closes the
/// transport before returning, so the caller's own tunnel teardown is the
/// only cleanup left to do (spec §4.5: "bring the tunnel interface down
/// and delete it" happens in the coordinator, after the pump returns).
pub async fn run(mut device: AsyncDevice, mut transport: Transport, mut shutdown: tokio::sync::watch::Receiver<bool>) -> io::Result<()> {
    // Spec §4.5: "read up to 65535 bytes from the tunnel fd" — the largest
    // possible IPv4 packet, regardless of the tunnel's configured MTU.
    let mut tunnel_buf = vec![0u8; 65535];

    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                tracing::info!("pump received shutdown signal");
                break Ok(());
            }

            read = device.read(&mut tunnel_buf) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if let Err(error) = transport.write(&tunnel_buf[..n]).await {
                            tracing::warn!(%error, "uplink write failed");
                            break Err(io::Error::other(error.to_string()));
                        }
                    }
                    Err(error) => break Err(error),
                }
            }

            received = transport.read() => {
                match received {
                    Ok(payload) => {
                        if let Err(error) = device.write_all(&payload).await {
                            break Err(error);
                        }
                    }
                    Err(error) => {
                        tracing::info!(%error, "downlink ended");
                        break Ok(());
                    }
                }
            }
        }
    };

    if let Err(error) = transport.close().await {
        tracing::warn!(%error, "transport close reported an error");
    }

    result
}
