//! Connection link parsing (spec §6.4): a URL-shaped rendering of the
//! minimum parameters needed to connect, so a link can be treated as a
//! pre-fetched [`AuthResponse`] rather than forcing a round-trip through
//! the control RPC.

use url::Url;

use crate::channel::AuthResponse;
use crate::error::ControlError;

/// Everything a `seaside+<nodetype>://` link carries, which is the host
/// and port the RPC response doesn't (the response assumes the caller
/// already knows who it talked to).
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    pub node_type: String,
    pub host: String,
    pub control_port: u16,
    pub auth: AuthResponse,
}

/// Parses `seaside+<nodetype>://<host>:<ctrl_port>/<anchor>?public=<hex>&payload=<token>`.
///
/// `typhoon_port`/`port_port`/`dns` aren't part of the link — a link only
/// ever needs to get the caller into a fresh `authenticate` exchange, so
/// those fields are left zero/empty in the returned [`AuthResponse`] and
/// the coordinator is expected to treat a link purely as `(public_key,
/// token, host, control_port)`, same as spec §6.4 describes.
pub fn parse(link: &str) -> Result<ConnectionLink, ControlError> {
    let url = Url::parse(link).map_err(|error| ControlError::MalformedLink(error.to_string()))?;

    let node_type = url
        .scheme()
        .strip_prefix("seaside+")
        .ok_or_else(|| ControlError::MalformedLink("scheme must be seaside+<nodetype>".into()))?
        .to_owned();

    let host = url.host_str().ok_or_else(|| ControlError::MalformedLink("missing host".into()))?.to_owned();
    let control_port = url.port().ok_or_else(|| ControlError::MalformedLink("missing control port".into()))?;

    let mut public_hex = None;
    let mut payload_hex = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "public" => public_hex = Some(value.into_owned()),
            "payload" => payload_hex = Some(value.into_owned()),
            _ => {}
        }
    }

    let public_hex = public_hex.ok_or_else(|| ControlError::MalformedLink("missing public= query parameter".into()))?;
    let payload_hex = payload_hex.ok_or_else(|| ControlError::MalformedLink("missing payload= query parameter".into()))?;

    let public_key_bytes = hex::decode(&public_hex).map_err(|error| ControlError::MalformedLink(error.to_string()))?;
    let public_key: [u8; 32] =
        public_key_bytes.try_into().map_err(|_| ControlError::MalformedLink("public key must be 32 bytes".into()))?;
    let token = hex::decode(&payload_hex).map_err(|error| ControlError::MalformedLink(error.to_string()))?;

    Ok(ConnectionLink {
        node_type,
        host,
        control_port,
        auth: AuthResponse { public_key, token, typhoon_port: 0, port_port: 0, dns: String::new() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_link() {
        let link = "seaside+whirlpool://vpn.example.com:8587/connect?public=\
            0101010101010101010101010101010101010101010101010101010101010101&payload=deadbeef";
        let parsed = parse(link).unwrap();
        assert_eq!(parsed.node_type, "whirlpool");
        assert_eq!(parsed.host, "vpn.example.com");
        assert_eq!(parsed.control_port, 8587);
        assert_eq!(parsed.auth.public_key, [1u8; 32]);
        assert_eq!(parsed.auth.token, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(parse("https://vpn.example.com:8587/connect?public=00&payload=00").is_err());
    }

    #[test]
    fn rejects_missing_query_params() {
        assert!(parse("seaside+whirlpool://vpn.example.com:8587/connect").is_err());
    }
}
