//! PORT wire codec: a reliable, ordered, TCP-carried protocol with three
//! message kinds (spec §4.3). Pure build/parse over byte slices; nothing
//! here touches a socket — that's `seaside-transport`'s job.

use rand::RngCore;
use rand::rngs::OsRng;
use seaside_crypto::{Asymmetric, Symmetric};

use crate::error::ProtocolError;
use crate::flags::ProtocolFlags;

/// Canonical width of the client-name field in a Client INIT (spec §9's
/// redesign note: treat 32 as canonical regardless of the source's
/// inconsistency).
pub const CLIENT_NAME_LEN: usize = 32;

fn random_tail(max_tail: usize) -> Vec<u8> {
    let len = if max_tail == 0 {
        0
    } else {
        (OsRng.next_u32() as usize) % (max_tail + 1)
    };
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
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidClientName)
}

/// `Client INIT`: asymmetric envelope carrying `flags | client_name(32) |
/// token_ct_len:2 | tail_len:2`, followed by the symmetric envelope of the
/// token and the random tail. Returns the derived session cipher and the
/// bytes to send.
pub fn build_client_init(
    listener_public: &Asymmetric,
    client_name: &str,
    token: &[u8],
    max_tail: usize,
) -> Result<(Symmetric, Vec<u8>), ProtocolError> {
    let name_field = pad_client_name(client_name)?;
    let tail = random_tail(max_tail);

    // The token is sealed first so its ciphertext length is known before
    // the header (which carries `token_ct_len`) is built and sealed under
    // the same session cipher.
    let (cipher, hidden_public) = listener_public.begin_session();
    let token_ct = cipher.seal(token, None);

    let mut header = Vec::with_capacity(1 + CLIENT_NAME_LEN + 2 + 2);
    header.push(ProtocolFlags::INIT.as_byte());
    header.extend_from_slice(&name_field);
    header.extend_from_slice(&(token_ct.len() as u16).to_be_bytes());
    header.extend_from_slice(&(tail.len() as u16).to_be_bytes());

    let mut sealed = cipher.seal(&header, Some(&hidden_public));
    sealed.extend_from_slice(&hidden_public);
    sealed.extend_from_slice(&token_ct);
    sealed.extend_from_slice(&tail);

    Ok((cipher, sealed))
}

pub struct ClientInit {
    pub token: Vec<u8>,
}

/// Fixed plaintext size of the `Client INIT` header, before AEAD overhead.
pub const CLIENT_INIT_HEADER_LEN: usize = 1 + CLIENT_NAME_LEN + 2 + 2;

/// Fixed wire size of the `Client INIT` asymmetric envelope, i.e. exactly
/// how many bytes the transport must read off a fresh connection before it
/// can learn `token_ct_len`/`tail_len` and know how much more to read.
pub const CLIENT_INIT_ENVELOPE_LEN: usize = CLIENT_INIT_HEADER_LEN + seaside_crypto::ASYMMETRIC_CIPHERTEXT_OVERHEAD;

pub struct ClientInitHeader {
    pub client_name: String,
    pub token_ct_len: usize,
    pub tail_len: usize,
}

/// Opens the leading asymmetric envelope, exactly `CLIENT_INIT_ENVELOPE_LEN`
/// bytes. Returns the derived session cipher and the header fields; the
/// caller still owes the transport `token_ct_len + tail_len` more bytes
/// before the token can be recovered with [`finish_client_init`].
pub fn open_client_init_envelope(listener: &Asymmetric, envelope: &[u8]) -> Result<(Symmetric, ClientInitHeader), ProtocolError> {
    if envelope.len() != CLIENT_INIT_ENVELOPE_LEN {
        return Err(ProtocolError::HeaderTooShort {
            expected: CLIENT_INIT_ENVELOPE_LEN,
            actual: envelope.len(),
        });
    }
    let (cipher, header) = listener.open(envelope)?;

    if header.is_empty() || ProtocolFlags::from_byte(header[0]) != ProtocolFlags::INIT {
        return Err(ProtocolError::InvalidFlags(header.first().copied().unwrap_or(0)));
    }
    if header.len() != CLIENT_INIT_HEADER_LEN {
        return Err(ProtocolError::HeaderTooShort {
            expected: CLIENT_INIT_HEADER_LEN,
            actual: header.len(),
        });
    }

    let mut name_field = [0u8; CLIENT_NAME_LEN];
    name_field.copy_from_slice(&header[1..1 + CLIENT_NAME_LEN]);
    let client_name = unpad_client_name(&name_field)?;

    let token_ct_len = u16::from_be_bytes([header[1 + CLIENT_NAME_LEN], header[1 + CLIENT_NAME_LEN + 1]]) as usize;
    let tail_len = u16::from_be_bytes([header[3 + CLIENT_NAME_LEN], header[3 + CLIENT_NAME_LEN + 1]]) as usize;

    Ok((cipher, ClientInitHeader { client_name, token_ct_len, tail_len }))
}

/// Recovers the token from the `token_ct_len`-byte slice following the
/// envelope (the trailing tail bytes are not passed here).
pub fn finish_client_init(cipher: &Symmetric, token_ct: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(cipher.open(token_ct, None)?)
}

/// Parse a `Client INIT` already fully assembled in memory: the envelope
/// followed by `token_ct ∥ tail`. Production code reads the two parts off
/// the wire in sequence via [`open_client_init_envelope`] and
/// [`finish_client_init`]; this all-at-once form is convenient for tests.
pub fn parse_client_init(listener: &Asymmetric, bytes: &[u8]) -> Result<(Symmetric, ClientInit), ProtocolError> {
    if bytes.len() < CLIENT_INIT_ENVELOPE_LEN {
        return Err(ProtocolError::HeaderTooShort {
            expected: CLIENT_INIT_ENVELOPE_LEN,
            actual: bytes.len(),
        });
    }
    let (envelope, rest) = bytes.split_at(CLIENT_INIT_ENVELOPE_LEN);
    let (cipher, header) = open_client_init_envelope(listener, envelope)?;

    if rest.len() < header.token_ct_len + header.tail_len {
        return Err(ProtocolError::BodyTooShort {
            expected: header.token_ct_len + header.tail_len,
            actual: rest.len(),
        });
    }
    let token_ct = &rest[..header.token_ct_len];
    let token = finish_client_init(&cipher, token_ct)?;

    Ok((cipher, ClientInit { token }))
}

/// `Server INIT`: a single symmetric envelope of `flags=INIT | status:1 |
/// user_id:2 | tail_len:2`, followed by the tail.
pub fn build_server_init(cipher: &Symmetric, status: u8, user_id: u16, max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let mut plaintext = Vec::with_capacity(1 + 1 + 2 + 2);
    plaintext.push(ProtocolFlags::INIT.as_byte());
    plaintext.push(status);
    plaintext.extend_from_slice(&user_id.to_be_bytes());
    plaintext.extend_from_slice(&(tail.len() as u16).to_be_bytes());

    let mut out = cipher.seal(&plaintext, None);
    out.extend_from_slice(&tail);
    out
}

pub struct ServerInit {
    pub status: u8,
    pub user_id: u16,
    /// Length of the random tail following this envelope on the wire; the
    /// transport must read and discard exactly this many further bytes.
    pub tail_len: usize,
}

/// Fixed size, in bytes, of the plaintext `Server INIT` header
/// (`flags | status | user_id | tail_len`), before AEAD overhead.
pub const SERVER_INIT_HEADER_LEN: usize = 1 + 1 + 2 + 2;

pub fn parse_server_init(cipher: &Symmetric, bytes: &[u8]) -> Result<ServerInit, ProtocolError> {
    let plaintext = cipher.open(bytes, None)?;
    if plaintext.len() < SERVER_INIT_HEADER_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: SERVER_INIT_HEADER_LEN, actual: plaintext.len() });
    }
    if ProtocolFlags::from_byte(plaintext[0]) != ProtocolFlags::INIT {
        return Err(ProtocolError::InvalidFlags(plaintext[0]));
    }
    let status = plaintext[1];
    let user_id = u16::from_be_bytes([plaintext[2], plaintext[3]]);
    let tail_len = u16::from_be_bytes([plaintext[4], plaintext[5]]) as usize;
    Ok(ServerInit { status, user_id, tail_len })
}

/// `DATA`/`TERM`: a header envelope `flags | data_ct_len:2 | tail_len:2`
/// followed by an independent envelope of the payload (absent for TERM)
/// and the tail. Two separate AEAD seals, matching spec §4.3's rationale
/// of keeping header parsing cost independent of payload size.
pub fn build_data(cipher: &Symmetric, payload: Option<&[u8]>, max_tail: usize) -> Vec<u8> {
    let tail = random_tail(max_tail);
    let flags = if payload.is_some() { ProtocolFlags::DATA } else { ProtocolFlags::TERM };

    let payload_ct = payload.map(|p| cipher.seal(p, None));
    let data_ct_len = payload_ct.as_ref().map(Vec::len).unwrap_or(0);

    let mut header_plain = Vec::with_capacity(1 + 2 + 2);
    header_plain.push(flags.as_byte());
    header_plain.extend_from_slice(&(data_ct_len as u16).to_be_bytes());
    header_plain.extend_from_slice(&(tail.len() as u16).to_be_bytes());

    let mut out = cipher.seal(&header_plain, None);
    if let Some(ct) = payload_ct {
        out.extend_from_slice(&ct);
    }
    out.extend_from_slice(&tail);
    out
}

pub enum DataFrame {
    Data(Vec<u8>),
    Term,
}

/// Parses a DATA/TERM frame. `header_and_rest` must contain the sealed
/// header envelope followed by the optional payload envelope and tail;
/// the caller (the PORT transport, which owns the TCP stream) is
/// responsible for reading exactly the header envelope first to learn
/// `data_ct_len`, then reading the remainder — this function assumes
/// `header_envelope` and `rest` have already been split that way.
/// Fixed size, in bytes, of the plaintext DATA/TERM header.
pub const DATA_HEADER_LEN: usize = 1 + 2 + 2;

pub fn parse_data_header(cipher: &Symmetric, header_envelope: &[u8]) -> Result<(ProtocolFlags, usize, usize), ProtocolError> {
    let plaintext = cipher.open(header_envelope, None)?;
    if plaintext.len() < DATA_HEADER_LEN {
        return Err(ProtocolError::HeaderTooShort { expected: DATA_HEADER_LEN, actual: plaintext.len() });
    }
    let flags = ProtocolFlags::from_byte(plaintext[0]);
    if flags != ProtocolFlags::DATA && flags != ProtocolFlags::TERM {
        return Err(ProtocolError::InvalidFlags(plaintext[0]));
    }
    let data_ct_len = u16::from_be_bytes([plaintext[1], plaintext[2]]) as usize;
    let tail_len = u16::from_be_bytes([plaintext[3], plaintext[4]]) as usize;
    Ok((flags, data_ct_len, tail_len))
}

pub fn parse_data_payload(cipher: &Symmetric, flags: ProtocolFlags, payload_envelope: &[u8]) -> Result<DataFrame, ProtocolError> {
    if flags == ProtocolFlags::TERM {
        return Ok(DataFrame::Term);
    }
    let payload = cipher.open(payload_envelope, None)?;
    Ok(DataFrame::Data(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_init_round_trip() {
        let key = [5u8; 32];
        let cipher = Symmetric::new(&key);
        let wire = build_server_init(&cipher, 0, 4242, 0);
        let parsed = parse_server_init(&cipher, &wire).unwrap();
        assert_eq!(parsed.status, 0);
        assert_eq!(parsed.user_id, 4242);
        assert_eq!(parsed.tail_len, 0);
    }

    #[test]
    fn data_header_round_trip_reports_payload_len() {
        let key = [6u8; 32];
        let cipher = Symmetric::new(&key);
        let wire = build_data(&cipher, Some(b"hello"), 0);
        let header_len = DATA_HEADER_LEN + seaside_crypto::SYMMETRIC_CIPHERTEXT_OVERHEAD;
        let (header_envelope, rest) = wire.split_at(header_len);
        let (flags, data_ct_len, tail_len) = parse_data_header(&cipher, header_envelope).unwrap();
        assert_eq!(flags, ProtocolFlags::DATA);
        assert_eq!(tail_len, 0);
        let payload_envelope = &rest[..data_ct_len];
        match parse_data_payload(&cipher, flags, payload_envelope).unwrap() {
            DataFrame::Data(bytes) => assert_eq!(bytes, b"hello"),
            DataFrame::Term => panic!("expected data"),
        }
    }

    #[test]
    fn term_frame_has_no_payload() {
        let key = [7u8; 32];
        let cipher = Symmetric::new(&key);
        let wire = build_data(&cipher, None, 0);
        let header_len = DATA_HEADER_LEN + seaside_crypto::SYMMETRIC_CIPHERTEXT_OVERHEAD;
        let (header_envelope, _rest) = wire.split_at(header_len);
        let (flags, data_ct_len, _tail_len) = parse_data_header(&cipher, header_envelope).unwrap();
        assert_eq!(flags, ProtocolFlags::TERM);
        assert_eq!(data_ct_len, 0);
    }

    #[test]
    fn client_name_padding_round_trips() {
        let field = pad_client_name("algae-client").unwrap();
        assert_eq!(unpad_client_name(&field).unwrap(), "algae-client");
    }

    #[test]
    fn client_name_too_long_is_rejected() {
        let too_long = "x".repeat(CLIENT_NAME_LEN + 1);
        assert!(pad_client_name(&too_long).is_err());
    }

    #[test]
    fn client_init_round_trip() {
        let listener = Asymmetric::generate();
        let client = Asymmetric::from_public(listener.public_key());
        let (_client_cipher, wire) = build_client_init(&client, "algae-test", b"hello-token", 0).unwrap();
        let (_server_cipher, parsed) = parse_client_init(&listener, &wire).unwrap();
        assert_eq!(parsed.token, b"hello-token");
    }

    #[test]
    fn client_init_two_phase_read_matches_one_shot() {
        let listener = Asymmetric::generate();
        let client = Asymmetric::from_public(listener.public_key());
        let (_client_cipher, wire) = build_client_init(&client, "two-phase", b"token-2", 3).unwrap();

        let (envelope, rest) = wire.split_at(CLIENT_INIT_ENVELOPE_LEN);
        let (cipher, header) = open_client_init_envelope(&listener, envelope).unwrap();
        assert_eq!(header.client_name, "two-phase");

        let token_ct = &rest[..header.token_ct_len];
        let token = finish_client_init(&cipher, token_ct).unwrap();
        assert_eq!(token, b"token-2");
    }
}
