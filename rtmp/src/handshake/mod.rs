//! The fixed size byte exchange that precedes chunked messaging.
//!
//! Each side sends a version byte (`3`) followed by a 1536 byte greeting, then echoes the
//! greeting it received.  Once a side has verified the echo of its own greeting the handshake is
//! complete and every following byte belongs to the chunk stream.
//!
//! Servers also understand the digest variant used by Flash based encoders.  If the client's
//! greeting carries a valid HMAC digest, the server signs its own greeting and answers with a
//! signed response instead of a plain echo.  The variant is chosen once per handshake and has no
//! effect on the chunk stream that follows.
//!
//! ```
//! use ingest_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
//!
//! let mut client = Handshake::new(PeerType::Client);
//! let mut server = Handshake::new(PeerType::Server);
//!
//! let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();
//! let s0_s1_s2 = match server.process_bytes(&c0_c1).unwrap() {
//!     HandshakeProcessResult::InProgress { response_bytes } => response_bytes,
//!     x => panic!("Unexpected result: {:?}", x),
//! };
//!
//! let c2 = match client.process_bytes(&s0_s1_s2).unwrap() {
//!     HandshakeProcessResult::Completed { response_bytes, .. } => response_bytes,
//!     x => panic!("Unexpected result: {:?}", x),
//! };
//!
//! match server.process_bytes(&c2).unwrap() {
//!     HandshakeProcessResult::Completed { .. } => (),
//!     x => panic!("Unexpected result: {:?}", x),
//! }
//! ```

mod digest;
mod errors;

pub use self::errors::HandshakeError;

use self::digest::DIGEST_SIZE;
use rand::Rng;

pub const RTMP_VERSION: u8 = 3;
pub const PACKET_SIZE: usize = 1536;
const TIME_FIELD_SIZE: usize = 4;
const SERVER_VERSION_FIELD: [u8; 4] = [0x04, 0x05, 0x00, 0x01];

/// Which side of the connection this handshake represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerType {
    Server,
    Client,
}

/// Progress through the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Nothing has been sent yet
    Start,

    /// Our version byte and greeting were sent; waiting for the peer's greeting
    SentGreeting,

    /// The peer's greeting was echoed; waiting for the echo of ours
    AwaitingEcho,

    /// Chunked messaging may begin
    Ready,
}

/// Which flavor of the handshake was negotiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeVariant {
    Simple,
    Digest,
}

/// The outcome of feeding bytes into a handshake
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeProcessResult {
    /// More bytes are needed from the peer.  Any response bytes must be sent to it.
    InProgress { response_bytes: Vec<u8> },

    /// The handshake is done.  `response_bytes` still has to be sent, and `remaining_bytes`
    /// are the first bytes of the chunk stream.
    Completed {
        response_bytes: Vec<u8>,
        remaining_bytes: Vec<u8>,
    },
}

/// A sans-IO handshake state machine for one side of a connection
pub struct Handshake {
    peer_type: PeerType,
    stage: HandshakeStage,
    variant: HandshakeVariant,
    buffer: Vec<u8>,
    received_version: bool,
    sent_greeting: Vec<u8>,
    sent_digest: Option<[u8; DIGEST_SIZE]>,
}

impl Handshake {
    pub fn new(peer_type: PeerType) -> Handshake {
        Handshake {
            peer_type,
            stage: HandshakeStage::Start,
            variant: HandshakeVariant::Simple,
            buffer: Vec::with_capacity(PACKET_SIZE * 2 + 1),
            received_version: false,
            sent_greeting: Vec::new(),
            sent_digest: None,
        }
    }

    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    pub fn variant(&self) -> HandshakeVariant {
        self.variant
    }

    /// Creates the version byte and greeting a client opens the connection with.
    ///
    /// Servers never speak first, so this fails for a server side handshake or when the
    /// greeting was already generated.
    pub fn generate_outbound_p0_and_p1(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.peer_type != PeerType::Client || self.stage != HandshakeStage::Start {
            return Err(HandshakeError::GreetingNotExpected);
        }

        self.sent_greeting = create_simple_greeting();
        self.stage = HandshakeStage::SentGreeting;

        let mut bytes = Vec::with_capacity(PACKET_SIZE + 1);
        bytes.push(RTMP_VERSION);
        bytes.extend_from_slice(&self.sent_greeting);
        Ok(bytes)
    }

    /// Consumes bytes received from the peer, returning any bytes that must be sent back.
    ///
    /// Short reads are normal: bytes are buffered until a complete packet is available.  A
    /// client that has not generated its greeting yet does so implicitly.
    pub fn process_bytes(&mut self, data: &[u8]) -> Result<HandshakeProcessResult, HandshakeError> {
        if self.stage == HandshakeStage::Ready {
            return Err(HandshakeError::HandshakeAlreadyCompleted);
        }

        self.buffer.extend_from_slice(data);
        let mut response_bytes = Vec::new();
        if self.peer_type == PeerType::Client && self.stage == HandshakeStage::Start {
            response_bytes.extend(self.generate_outbound_p0_and_p1()?);
        }

        loop {
            let made_progress = match (self.peer_type, self.stage) {
                (_, HandshakeStage::Ready) => {
                    let remaining_bytes = std::mem::take(&mut self.buffer);
                    return Ok(HandshakeProcessResult::Completed {
                        response_bytes,
                        remaining_bytes,
                    });
                }

                (PeerType::Server, HandshakeStage::Start) => self.server_read_greeting(&mut response_bytes)?,
                (PeerType::Client, HandshakeStage::SentGreeting) => self.client_read_greeting(&mut response_bytes)?,
                (_, HandshakeStage::AwaitingEcho) => self.read_echo()?,
                (_, _) => false,
            };

            if !made_progress {
                return Ok(HandshakeProcessResult::InProgress { response_bytes });
            }
        }
    }

    fn read_version(&mut self) -> Result<bool, HandshakeError> {
        if self.received_version {
            return Ok(true);
        }

        if self.buffer.is_empty() {
            return Ok(false);
        }

        let version = self.buffer.remove(0);
        if version != RTMP_VERSION {
            return Err(HandshakeError::BadVersionId { version });
        }

        self.received_version = true;
        Ok(true)
    }

    fn server_read_greeting(&mut self, response: &mut Vec<u8>) -> Result<bool, HandshakeError> {
        if !self.read_version()? || self.buffer.len() < PACKET_SIZE {
            return Ok(false);
        }

        let client_greeting: Vec<u8> = self.buffer.drain(..PACKET_SIZE).collect();
        let client_digest = if client_greeting[4..8] == [0, 0, 0, 0] {
            None
        } else {
            digest::find_player_digest(&client_greeting)?
        };

        response.push(RTMP_VERSION);
        match client_digest {
            None => {
                self.sent_greeting = create_simple_greeting();
                response.extend_from_slice(&self.sent_greeting);
                response.extend_from_slice(&client_greeting);
            }

            Some((layout, client_digest)) => {
                self.variant = HandshakeVariant::Digest;
                let mut greeting = create_simple_greeting();
                greeting[TIME_FIELD_SIZE..8].copy_from_slice(&SERVER_VERSION_FIELD);
                self.sent_digest = Some(digest::sign_server_greeting(&mut greeting, layout)?);
                self.sent_greeting = greeting;

                let mut answer = create_random_packet();
                digest::sign_response(&mut answer, &digest::server_key(), &client_digest)?;

                response.extend_from_slice(&self.sent_greeting);
                response.extend_from_slice(&answer);
            }
        }

        self.stage = HandshakeStage::AwaitingEcho;
        Ok(true)
    }

    fn client_read_greeting(&mut self, response: &mut Vec<u8>) -> Result<bool, HandshakeError> {
        if !self.read_version()? || self.buffer.len() < PACKET_SIZE {
            return Ok(false);
        }

        let server_greeting: Vec<u8> = self.buffer.drain(..PACKET_SIZE).collect();
        response.extend_from_slice(&server_greeting);
        self.stage = HandshakeStage::AwaitingEcho;
        Ok(true)
    }

    fn read_echo(&mut self) -> Result<bool, HandshakeError> {
        if self.buffer.len() < PACKET_SIZE {
            return Ok(false);
        }

        let echo: Vec<u8> = self.buffer.drain(..PACKET_SIZE).collect();
        if let Some(sent_digest) = self.sent_digest {
            // Flash clients may answer a signed greeting with a signed response
            if digest::is_valid_response(&echo, &digest::player_key(), &sent_digest)? {
                self.stage = HandshakeStage::Ready;
                return Ok(true);
            }
        }

        if echo[..TIME_FIELD_SIZE] != self.sent_greeting[..TIME_FIELD_SIZE] {
            return Err(HandshakeError::IncorrectPeerTime);
        }

        // The second time field is the peer's read time and may differ from what we sent
        if echo[8..] != self.sent_greeting[8..] {
            return Err(HandshakeError::IncorrectRandomData);
        }

        self.stage = HandshakeStage::Ready;
        Ok(true)
    }
}

/// A greeting with a zero time, zeroed version field, and random filler
fn create_simple_greeting() -> Vec<u8> {
    let mut packet = create_random_packet();
    packet[..8].copy_from_slice(&[0; 8]);
    packet
}

fn create_random_packet() -> Vec<u8> {
    let mut packet = vec![0_u8; PACKET_SIZE];
    rand::thread_rng().fill(&mut packet[..]);
    packet
}

#[cfg(test)]
mod tests {
    use super::digest::DigestLayout;
    use super::*;

    fn expect_in_progress(result: HandshakeProcessResult) -> Vec<u8> {
        match result {
            HandshakeProcessResult::InProgress { response_bytes } => response_bytes,
            x => panic!("Expected InProgress, received {:?}", x),
        }
    }

    fn create_flash_client_greeting() -> Vec<u8> {
        let mut packet = create_random_packet();
        packet[..4].copy_from_slice(&[0, 0, 0, 0]);
        packet[4..8].copy_from_slice(&[0x80, 0x00, 0x07, 0x02]);

        let offset = DigestLayout::Second.digest_offset(&packet);
        let digest = hmac_for_test(&packet, offset);
        packet[offset..offset + DIGEST_SIZE].copy_from_slice(&digest);
        packet
    }

    fn hmac_for_test(packet: &[u8], offset: usize) -> [u8; DIGEST_SIZE] {
        use hmac::{Hmac, Mac, NewMac};
        let mut mac = Hmac::<sha2::Sha256>::new_varkey(b"Genuine Adobe Flash Player 001").unwrap();
        mac.update(&packet[..offset]);
        mac.update(&packet[offset + DIGEST_SIZE..]);

        let mut output = [0_u8; DIGEST_SIZE];
        output.copy_from_slice(&mac.finalize().into_bytes());
        output
    }

    #[test]
    fn client_greeting_starts_with_version_3() {
        let mut client = Handshake::new(PeerType::Client);
        let bytes = client.generate_outbound_p0_and_p1().unwrap();

        assert_eq!(bytes.len(), PACKET_SIZE + 1);
        assert_eq!(bytes[0], 3);
        assert_eq!(client.stage(), HandshakeStage::SentGreeting);
    }

    #[test]
    fn server_cannot_generate_greeting_first() {
        let mut server = Handshake::new(PeerType::Server);

        match server.generate_outbound_p0_and_p1() {
            Err(HandshakeError::GreetingNotExpected) => (),
            x => panic!("Expected GreetingNotExpected, received {:?}", x),
        }
    }

    #[test]
    fn unsupported_version_is_rejected_immediately() {
        let mut server = Handshake::new(PeerType::Server);

        match server.process_bytes(&[6]) {
            Err(HandshakeError::BadVersionId { version: 6 }) => (),
            x => panic!("Expected BadVersionId, received {:?}", x),
        }
    }

    #[test]
    fn both_sides_reach_ready_in_one_round_trip() {
        let mut client = Handshake::new(PeerType::Client);
        let mut server = Handshake::new(PeerType::Server);

        let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();
        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());
        assert_eq!(s0_s1_s2.len(), 1 + PACKET_SIZE * 2);
        assert_eq!(server.stage(), HandshakeStage::AwaitingEcho);

        let c2 = match client.process_bytes(&s0_s1_s2).unwrap() {
            HandshakeProcessResult::Completed { response_bytes, remaining_bytes } => {
                assert!(remaining_bytes.is_empty());
                response_bytes
            }
            x => panic!("Expected client completion, received {:?}", x),
        };

        match server.process_bytes(&c2).unwrap() {
            HandshakeProcessResult::Completed { response_bytes, .. } => assert!(response_bytes.is_empty()),
            x => panic!("Expected server completion, received {:?}", x),
        }

        assert_eq!(client.stage(), HandshakeStage::Ready);
        assert_eq!(server.stage(), HandshakeStage::Ready);
        assert_eq!(server.variant(), HandshakeVariant::Simple);
    }

    #[test]
    fn bytes_after_echo_are_returned_as_remaining() {
        let mut client = Handshake::new(PeerType::Client);
        let mut server = Handshake::new(PeerType::Server);

        let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();
        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());
        let mut c2 = match client.process_bytes(&s0_s1_s2).unwrap() {
            HandshakeProcessResult::Completed { response_bytes, .. } => response_bytes,
            x => panic!("Unexpected result {:?}", x),
        };

        c2.extend_from_slice(&[1, 2, 3]);
        match server.process_bytes(&c2).unwrap() {
            HandshakeProcessResult::Completed { remaining_bytes, .. } => assert_eq!(remaining_bytes, vec![1, 2, 3]),
            x => panic!("Unexpected result {:?}", x),
        }
    }

    #[test]
    fn greeting_split_across_reads_is_buffered() {
        let mut client = Handshake::new(PeerType::Client);
        let mut server = Handshake::new(PeerType::Server);
        let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();

        let first = expect_in_progress(server.process_bytes(&c0_c1[..700]).unwrap());
        assert!(first.is_empty());
        assert_eq!(server.stage(), HandshakeStage::Start);

        let second = expect_in_progress(server.process_bytes(&c0_c1[700..]).unwrap());
        assert_eq!(second.len(), 1 + PACKET_SIZE * 2);
    }

    #[test]
    fn mismatched_echo_fails_handshake() {
        let mut client = Handshake::new(PeerType::Client);
        let mut server = Handshake::new(PeerType::Server);

        let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();
        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());
        let mut c2 = s0_s1_s2[1..=PACKET_SIZE].to_vec();
        c2[100] = c2[100].wrapping_add(1);

        match server.process_bytes(&c2) {
            Err(HandshakeError::IncorrectRandomData) => (),
            x => panic!("Expected IncorrectRandomData, received {:?}", x),
        }
    }

    #[test]
    fn echo_with_wrong_time_fails_handshake() {
        let mut server = Handshake::new(PeerType::Server);
        let mut c0_c1 = vec![RTMP_VERSION];
        c0_c1.extend(create_simple_greeting());
        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());

        let mut c2 = s0_s1_s2[1..=PACKET_SIZE].to_vec();
        c2[0] = 9;

        match server.process_bytes(&c2) {
            Err(HandshakeError::IncorrectPeerTime) => (),
            x => panic!("Expected IncorrectPeerTime, received {:?}", x),
        }
    }

    #[test]
    fn flash_client_greeting_negotiates_digest_variant() {
        let mut server = Handshake::new(PeerType::Server);
        let mut c0_c1 = vec![RTMP_VERSION];
        c0_c1.extend(create_flash_client_greeting());

        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());
        assert_eq!(server.variant(), HandshakeVariant::Digest);
        assert_eq!(&s0_s1_s2[5..9], &SERVER_VERSION_FIELD);

        // A plain echo of the signed greeting is still accepted
        let c2 = s0_s1_s2[1..=PACKET_SIZE].to_vec();
        match server.process_bytes(&c2).unwrap() {
            HandshakeProcessResult::Completed { .. } => (),
            x => panic!("Expected completion, received {:?}", x),
        }
    }

    #[test]
    fn digest_variant_accepts_signed_response() {
        let mut server = Handshake::new(PeerType::Server);
        let mut c0_c1 = vec![RTMP_VERSION];
        c0_c1.extend(create_flash_client_greeting());
        let _ = expect_in_progress(server.process_bytes(&c0_c1).unwrap());

        let server_digest = server.sent_digest.unwrap();
        let mut c2 = create_random_packet();
        digest::sign_response(&mut c2, &digest::player_key(), &server_digest).unwrap();

        match server.process_bytes(&c2).unwrap() {
            HandshakeProcessResult::Completed { .. } => (),
            x => panic!("Expected completion, received {:?}", x),
        }
    }

    #[test]
    fn processing_after_completion_is_an_error() {
        let mut client = Handshake::new(PeerType::Client);
        let mut server = Handshake::new(PeerType::Server);
        let c0_c1 = client.generate_outbound_p0_and_p1().unwrap();
        let s0_s1_s2 = expect_in_progress(server.process_bytes(&c0_c1).unwrap());
        let _ = client.process_bytes(&s0_s1_s2).unwrap();

        match client.process_bytes(&[1]) {
            Err(HandshakeError::HandshakeAlreadyCompleted) => (),
            x => panic!("Expected HandshakeAlreadyCompleted, received {:?}", x),
        }
    }
}
