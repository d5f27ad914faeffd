//! TYPHOON wire codec: an unreliable, UDP-carried protocol with its own
//! retransmitted handshake and periodic HDSK liveness frames (spec §4.4).
//! Pure build/parse over byte slices; the decay loop and socket I/O live in
//! `seaside-transport`.

use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use seaside_crypto::{Asymmetric, Symmetric};

use crate::config::TyphoonConfig;
use crate::error::ProtocolError;
use crate::flags::ProtocolFlags;
use crate::port::CLIENT_NAME_LEN;

fn random_tail(max_tail: usize) -> Vec<u8> {
    let len = if max_tail == 0 { 0 } else { (OsRng.next_u32() as usize) % (max_tail + 1) };
    let mut tail = vec![0u8; len];
    OsRng.fill_bytes(&mut tail);
    tail
}

fn pad_client_name(name: &str) -> Result<[u8; CLIENT_NAME_LEN], ProtocolError> {
    let bytes = name.as_bytes();
    if bytes.len() > CLIENT_NAME_LEN {
        return Err(ProtocolError::InvalidClientName);
    }
    let mut padded = [0u8; CLIENT_NAME_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn unpad_client_name(field: &[u8; CLIENT_NAME_LEN]) -> Result<String, ProtocolError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(CLIENT_NAME_LEN);
    std::str::from_utf8(&field[..end]).map(str::to_owned).map_err(|_| ProtocolError::InvalidClientName)
}

fn encode_next_in(d: Duration) -> u32 {
    d.as_millis() as u32
}

fn decode_next_in(v: u32) -> Duration {
    Duration::from_millis(v as u64)
}

fn validate_next_in(got: Duration, range: (Duration, Duration)) -> Result<(), ProtocolError> {
    if got < range.0 || got > range.1 {
        return Err(ProtocolError::NextInOutOfRange {
            got: got.as_millis() as u64,
            min: range.0.as_millis() as u64,
            max: range.1.as_millis() as u64,
        });
    }
    Ok(())
}

/// Seals a Client INIT plaintext (`flags=INIT | packet_number:4 |
/// client_name:32 | next_in:4 | tail_len:2 | token | tail`) under an
/// already-established session `cipher`, appending `hidden_public` as the
/// envelope's trailing bytes. A fresh random tail is drawn on every call
/// even when `cipher`/`hidden_public` are reused across retransmits (spec
/// §4.4.2 step 4: "same packet_number, new tail").
fn seal_client_init(
    cipher: &Symmetric,
    hidden_public: &[u8; 32],
    packet_number: u32,
    client_name: &str,
    next_in: Duration,
    token: &[u8],
    max_tail: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let name_field = pad_client_name(client_name)?;
    let tail = random_tail(max_tail);

    let mut plaintext = Vec::with_capacity(1 + 4 + CLIENT_NAME_LEN + 4 + 2 + token.len() + tail.len());
    plaintext.push(ProtocolFlags::INIT.as_byte());
    plaintext.extend_from_slice(&packet_number.to_be_bytes());
    plaintext.extend_from_slice(&name_field);
    plaintext.extend_from_slice(&encode_next_in(next_in).to_be_bytes());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(token);
    plaintext.extend_from_slice(&tail);

    let mut sealed = cipher.seal(&plaintext, Some(hidden_public));
    sealed.extend_from_slice(hidden_public);
    Ok(sealed)
}

/// First Client INIT of a handshake: establishes a fresh ephemeral session
/// against `listener_public` and seals the INIT under it. Returns the
/// session cipher and hidden public key alongside the wire bytes so a
/// caller that needs to retransmit can reuse them via
/// [`retransmit_client_init`] instead of starting a new session per retry.
pub fn build_client_init(
    listener_public: &Asymmetric,
    packet_number: u32,
    client_name: &str,
    next_in: Duration,
    token: &[u8],
    max_tail: usize,
) -> Result<(Symmetric, [u8; 32], Vec<u8>), ProtocolError> {
    let (cipher, hidden_public) = listener_public.begin_session();
    let wire = seal_client_init(&cipher, &hidden_public, packet_number, client_name, next_in, token, max_tail)?;
    Ok((cipher, hidden_public, wire))
}

/// Retransmits a Client INIT under the same session established by an
/// earlier [`build_client_init`] call: same cipher, same hidden public key,
/// same `packet_number`, a fresh tail (spec §4.4.2 step 4).
pub fn retransmit_client_init(
    cipher: &Symmetric,
    hidden_public: &[u8; 32],
    packet_number: u32,
    client_name: &str,
    next_in: Duration,
    token: &[u8],
    max_tail: usize,
) -> Result<Vec<u8>, ProtocolError> {
    seal_client_init(cipher, hidden_public, packet_number, client_name, next_in, token, max_tail)
}

pub struct ClientInit {
    pub client_name: String,
    pub packet_number: u32,
    pub next_in: Duration,
    pub token: Vec<u8>,
}

/// Parse a `Client INIT` datagram; `next_in` must fall in the *initial*
/// range (spec §4.4.1).
pub fn parse_client_init(listener: &Asymmetric, bytes: &[u8], config: &TyphoonConfig) -> Result<(Symmetric, ClientInit), ProtocolError> {
    const FIXED_LEN: usize = 1 + 4 + CLIENT_NAME_LEN + 4 + 2;
    let (cipher, plaintext) = listener.open(bytes)?;

    if plaintext.len() < FIXED_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: FIXED_LEN, actual: plaintext.len() });
    }
    if ProtocolFlags::from_byte(plaintext[0]) != ProtocolFlags::INIT {
        return Err(ProtocolError::InvalidFlags(plaintext[0]));
    }

    let packet_number = u32::from_be_bytes(plaintext[1..5].try_into().unwrap());
    let mut name_field = [0u8; CLIENT_NAME_LEN];
    name_field.copy_from_slice(&plaintext[5..5 + CLIENT_NAME_LEN]);
    let client_name = unpad_client_name(&name_field)?;

    let next_in_off = 5 + CLIENT_NAME_LEN;
    let next_in = decode_next_in(u32::from_be_bytes(plaintext[next_in_off..next_in_off + 4].try_into().unwrap()));
    let tail_len_off = next_in_off + 4;
    let tail_len = u16::from_be_bytes([plaintext[tail_len_off], plaintext[tail_len_off + 1]]) as usize;

    validate_next_in(next_in, config.initial_next_in_range())?;

    let body = &plaintext[FIXED_LEN..];
    if body.len() < tail_len {
        return Err(ProtocolError::BodyTooShort { expected: tail_len, actual: body.len() });
    }
    let token = body[..body.len() - tail_len].to_vec();

    Ok((cipher, ClientInit { client_name, packet_number, next_in, token }))
}

/// `Server INIT`: `flags=INIT | packet_number:4 | status:1 | user_id:2 |
/// next_in:4 | tail_len:2 | tail`, a single symmetric envelope.
pub fn build_server_init(cipher: &Symmetric, packet_number: u32, status: u8, user_id: u16, next_in: Duration, max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let mut plaintext = Vec::with_capacity(1 + 4 + 1 + 2 + 4 + 2 + tail.len());
    plaintext.push(ProtocolFlags::INIT.as_byte());
    plaintext.extend_from_slice(&packet_number.to_be_bytes());
    plaintext.push(status);
    plaintext.extend_from_slice(&user_id.to_be_bytes());
    plaintext.extend_from_slice(&encode_next_in(next_in).to_be_bytes());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(&tail);
    cipher.seal(&plaintext, None)
}

pub struct ServerInit {
    pub status: u8,
    pub user_id: u16,
    pub next_in: Duration,
}

/// Parse a `Server INIT` datagram; `packet_number` must match the one the
/// client sent, and `next_in` must fall in the initial range.
pub fn parse_server_init(cipher: &Symmetric, bytes: &[u8], expected_packet_number: u32, config: &TyphoonConfig) -> Result<ServerInit, ProtocolError> {
    const FIXED_LEN: usize = 1 + 4 + 1 + 2 + 4 + 2;
    let plaintext = cipher.open(bytes, None)?;
    if plaintext.len() < FIXED_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: FIXED_LEN, actual: plaintext.len() });
    }
    if ProtocolFlags::from_byte(plaintext[0]) != ProtocolFlags::INIT {
        return Err(ProtocolError::InvalidFlags(plaintext[0]));
    }
    let packet_number = u32::from_be_bytes(plaintext[1..5].try_into().unwrap());
    if packet_number != expected_packet_number {
        return Err(ProtocolError::UnexpectedPacketNumber { got: packet_number, expected: expected_packet_number });
    }
    let status = plaintext[5];
    let user_id = u16::from_be_bytes([plaintext[6], plaintext[7]]);
    let next_in = decode_next_in(u32::from_be_bytes(plaintext[8..12].try_into().unwrap()));
    validate_next_in(next_in, config.initial_next_in_range())?;
    Ok(ServerInit { status, user_id, next_in })
}

/// Build an HDSK or HDSK|DATA ("shadow-ride") frame: `flags | packet_number:4
/// | next_in:4 | tail_len:2 | data? | tail`.
pub fn build_hdsk(cipher: &Symmetric, packet_number: u32, next_in: Duration, data: Option<&[u8]>, max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let flags = if data.is_some() { ProtocolFlags::HDSK_DATA } else { ProtocolFlags::HDSK };

    let mut plaintext = Vec::with_capacity(1 + 4 + 4 + 2 + data.map_or(0, <[u8]>::len) + tail.len());
    plaintext.push(flags.as_byte());
    plaintext.extend_from_slice(&packet_number.to_be_bytes());
    plaintext.extend_from_slice(&encode_next_in(next_in).to_be_bytes());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());
    if let Some(data) = data {
        plaintext.extend_from_slice(data);
    }
    plaintext.extend_from_slice(&tail);
    cipher.seal(&plaintext, None)
}

/// Build a plain `DATA` frame: `flags=DATA | tail_len:2 | payload | tail`.
pub fn build_data(cipher: &Symmetric, data: &[u8], max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let mut plaintext = Vec::with_capacity(1 + 2 + data.len() + tail.len());
    plaintext.push(ProtocolFlags::DATA.as_byte());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(data);
    plaintext.extend_from_slice(&tail);
    cipher.seal(&plaintext, None)
}

/// Build a `TERM` frame: `flags=TERM | tail_len:2 | tail`.
pub fn build_term(cipher: &Symmetric, max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let mut plaintext = Vec::with_capacity(1 + 2 + tail.len());
    plaintext.push(ProtocolFlags::TERM.as_byte());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(&tail);
    cipher.seal(&plaintext, None)
}

/// A parsed post-handshake TYPHOON message, spanning both directions.
pub enum TyphoonMessage {
    Handshake { packet_number: u32, next_in: Duration },
    HandshakeData { packet_number: u32, next_in: Duration, data: Vec<u8> },
    Data(Vec<u8>),
    Term,
}

fn parse_hdsk_body(plaintext: &[u8], config: &TyphoonConfig) -> Result<(u32, Duration, Vec<u8>), ProtocolError> {
    const FIXED_LEN: usize = 1 + 4 + 4 + 2;
    if plaintext.len() < FIXED_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: FIXED_LEN, actual: plaintext.len() });
    }
    let packet_number = u32::from_be_bytes(plaintext[1..5].try_into().unwrap());
    let next_in = decode_next_in(u32::from_be_bytes(plaintext[5..9].try_into().unwrap()));
    let tail_len = u16::from_be_bytes([plaintext[9], plaintext[10]]) as usize;
    validate_next_in(next_in, config.steady_next_in_range())?;

    let body = &plaintext[FIXED_LEN..];
    if body.len() < tail_len {
        return Err(ProtocolError::BodyTooShort { expected: tail_len, actual: body.len() });
    }
    let data = body[..body.len() - tail_len].to_vec();
    Ok((packet_number, next_in, data))
}

fn parse_data_body(plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    const FIXED_LEN: usize = 1 + 2;
    if plaintext.len() < FIXED_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: FIXED_LEN, actual: plaintext.len() });
    }
    let tail_len = u16::from_be_bytes([plaintext[1], plaintext[2]]) as usize;
    let body = &plaintext[FIXED_LEN..];
    if body.len() < tail_len {
        return Err(ProtocolError::BodyTooShort { expected: tail_len, actual: body.len() });
    }
    Ok(body[..body.len() - tail_len].to_vec())
}

fn dispatch(plaintext: Vec<u8>, config: &TyphoonConfig) -> Result<TyphoonMessage, ProtocolError> {
    if plaintext.is_empty() {
        return Err(ProtocolError::HeaderTooShort { expected: 1, actual: 0 });
    }
    let flags = ProtocolFlags::from_byte(plaintext[0]);
    if flags == ProtocolFlags::HDSK_DATA {
        let (packet_number, next_in, data) = parse_hdsk_body(&plaintext, config)?;
        Ok(TyphoonMessage::HandshakeData { packet_number, next_in, data })
    } else if flags == ProtocolFlags::HDSK {
        let (packet_number, next_in, _) = parse_hdsk_body(&plaintext, config)?;
        Ok(TyphoonMessage::Handshake { packet_number, next_in })
    } else if flags == ProtocolFlags::DATA {
        Ok(TyphoonMessage::Data(parse_data_body(&plaintext)?))
    } else if flags == ProtocolFlags::TERM {
        Ok(TyphoonMessage::Term)
    } else {
        Err(ProtocolError::InvalidFlags(plaintext[0]))
    }
}

/// Parse a message sent by the server (the client's read path). HDSK and
/// HDSK|DATA frames must carry the `expected_packet_number` the client is
/// currently awaiting (spec §4.4.1's rejection rule).
pub fn parse_server_message(cipher: &Symmetric, bytes: &[u8], expected_packet_number: u32, config: &TyphoonConfig) -> Result<TyphoonMessage, ProtocolError> {
    let plaintext = cipher.open(bytes, None)?;
    let message = dispatch(plaintext, config)?;
    match &message {
        TyphoonMessage::Handshake { packet_number, .. } | TyphoonMessage::HandshakeData { packet_number, .. } if *packet_number != expected_packet_number => {
            Err(ProtocolError::UnexpectedPacketNumber { got: *packet_number, expected: expected_packet_number })
        }
        _ => Ok(message),
    }
}

/// Parse a message sent by the client (the server's read path). The server
/// accepts any packet number and instead restarts its decay baseline on it.
pub fn parse_client_message(cipher: &Symmetric, bytes: &[u8], config: &TyphoonConfig) -> Result<TyphoonMessage, ProtocolError> {
    let plaintext = cipher.open(bytes, None)?;
    dispatch(plaintext, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_init_round_trip() {
        let listener = Asymmetric::generate();
        let client = Asymmetric::from_public(listener.public_key());
        let config = TyphoonConfig::default();
        let (lo, _hi) = config.initial_next_in_range();

        let (_client_cipher, _hidden_public, wire) = build_client_init(&client, 42, "algae-test", lo, b"token-bytes", 0).unwrap();
        let (_server_cipher, parsed) = parse_client_init(&listener, &wire, &config).unwrap();

        assert_eq!(parsed.client_name, "algae-test");
        assert_eq!(parsed.packet_number, 42);
        assert_eq!(parsed.token, b"token-bytes");
    }

    #[test]
    fn server_init_rejects_wrong_packet_number() {
        let cipher = Symmetric::new(&[1u8; 32]);
        let config = TyphoonConfig::default();
        let (lo, _) = config.initial_next_in_range();
        let wire = build_server_init(&cipher, 7, 0, 99, lo, 0);
        assert!(matches!(
            parse_server_init(&cipher, &wire, 8, &config),
            Err(ProtocolError::UnexpectedPacketNumber { got: 7, expected: 8 })
        ));
    }

    #[test]
    fn hdsk_data_round_trip_is_shadowride() {
        let cipher = Symmetric::new(&[2u8; 32]);
        let config = TyphoonConfig::default();
        let next_in = config.min_next_in;
        let wire = build_hdsk(&cipher, 5, next_in, Some(b"payload"), 0);
        match parse_client_message(&cipher, &wire, &config).unwrap() {
            TyphoonMessage::HandshakeData { packet_number, data, .. } => {
                assert_eq!(packet_number, 5);
                assert_eq!(data, b"payload");
            }
            _ => panic!("expected HandshakeData"),
        }
    }

    #[test]
    fn next_in_out_of_range_is_rejected() {
        let cipher = Symmetric::new(&[3u8; 32]);
        let config = TyphoonConfig::default();
        let too_small = Duration::from_millis(1);
        let wire = build_hdsk(&cipher, 1, too_small, None, 0);
        assert!(matches!(parse_client_message(&cipher, &wire, &config), Err(ProtocolError::NextInOutOfRange { .. })));
    }

    #[test]
    fn term_is_recognised() {
        let cipher = Symmetric::new(&[4u8; 32]);
        let config = TyphoonConfig::default();
        let wire = build_term(&cipher, 0);
        assert!(matches!(parse_client_message(&cipher, &wire, &config), Ok(TyphoonMessage::Term)));
    }
}
