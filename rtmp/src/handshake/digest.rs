//! HMAC-SHA256 digests used by the Flash Player / Flash Media Server flavor of the handshake.
//!
//! The 1536 byte greeting hides a 32 byte digest at an offset derived from four bytes of the
//! greeting itself.  Two layouts exist, differing only in where those four offset bytes sit.

use super::errors::HandshakeError;
use super::PACKET_SIZE;
use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DIGEST_SIZE: usize = 32;
const RESPONSE_SIGNATURE_OFFSET: usize = PACKET_SIZE - DIGEST_SIZE;

const KEY_SUFFIX: [u8; 32] = [
    0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e, 0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e, 0x57,
    0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab, 0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb, 0x31, 0xae,
];

const PLAYER_KEY_TEXT: &[u8] = b"Genuine Adobe Flash Player 001";
const SERVER_KEY_TEXT: &[u8] = b"Genuine Adobe Flash Media Server 001";

/// Where the digest offset bytes live in a greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestLayout {
    /// Offset bytes at 8..12, digest somewhere in 12..772
    First,

    /// Offset bytes at 772..776, digest somewhere in 776..1536
    Second,
}

impl DigestLayout {
    pub fn digest_offset(&self, packet: &[u8]) -> usize {
        let (start, base) = match self {
            DigestLayout::First => (8, 12),
            DigestLayout::Second => (772, 776),
        };

        let sum: usize = packet[start..start + 4].iter().map(|x| *x as usize).sum();
        (sum % 728) + base
    }
}

pub fn player_key() -> Vec<u8> {
    [PLAYER_KEY_TEXT, &KEY_SUFFIX[..]].concat()
}

pub fn server_key() -> Vec<u8> {
    [SERVER_KEY_TEXT, &KEY_SUFFIX[..]].concat()
}

/// Looks for a digest signed with the player key, returning the layout it was found in and the
/// digest itself
pub fn find_player_digest(packet: &[u8]) -> Result<Option<(DigestLayout, [u8; DIGEST_SIZE])>, HandshakeError> {
    for layout in [DigestLayout::Second, DigestLayout::First] {
        let offset = layout.digest_offset(packet);
        let expected = calculate_packet_digest(packet, offset, PLAYER_KEY_TEXT)?;
        if expected[..] == packet[offset..offset + DIGEST_SIZE] {
            return Ok(Some((layout, expected)));
        }
    }

    Ok(None)
}

/// Writes a server key digest into the greeting using the specified layout, returning the digest
pub fn sign_server_greeting(
    packet: &mut [u8],
    layout: DigestLayout,
) -> Result<[u8; DIGEST_SIZE], HandshakeError> {
    let offset = layout.digest_offset(packet);
    let digest = calculate_packet_digest(packet, offset, SERVER_KEY_TEXT)?;
    packet[offset..offset + DIGEST_SIZE].copy_from_slice(&digest);
    Ok(digest)
}

/// Signs the tail of an echo packet so the peer can verify it answered its digest greeting
pub fn sign_response(
    packet: &mut [u8],
    full_key: &[u8],
    peer_digest: &[u8],
) -> Result<(), HandshakeError> {
    let signature = response_signature(packet, full_key, peer_digest)?;
    packet[RESPONSE_SIGNATURE_OFFSET..].copy_from_slice(&signature);
    Ok(())
}

pub fn is_valid_response(
    packet: &[u8],
    full_key: &[u8],
    our_digest: &[u8],
) -> Result<bool, HandshakeError> {
    let signature = response_signature(packet, full_key, our_digest)?;
    Ok(signature[..] == packet[RESPONSE_SIGNATURE_OFFSET..])
}

fn response_signature(
    packet: &[u8],
    full_key: &[u8],
    digest: &[u8],
) -> Result<[u8; DIGEST_SIZE], HandshakeError> {
    let key = hmac_sha256(full_key, &[digest])?;
    hmac_sha256(&key, &[&packet[..RESPONSE_SIGNATURE_OFFSET]])
}

fn calculate_packet_digest(
    packet: &[u8],
    offset: usize,
    key: &[u8],
) -> Result<[u8; DIGEST_SIZE], HandshakeError> {
    hmac_sha256(key, &[&packet[..offset], &packet[offset + DIGEST_SIZE..]])
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; DIGEST_SIZE], HandshakeError> {
    let mut mac = HmacSha256::new_varkey(key).map_err(|_| HandshakeError::InvalidDigestKey)?;
    for part in parts {
        mac.update(part);
    }

    let mut output = [0_u8; DIGEST_SIZE];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}
