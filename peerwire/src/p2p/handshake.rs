use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::ID;
use super::{to_id, PeerError, Result};

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

pub const HANDSHAKE_LEN: usize = 68;

// Byte range of the info hash within an encoded handshake.
const INFO_HASH_RANGE: std::ops::Range<usize> = 28..48;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   [u8; 19],
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   PROTOCOL,
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0; HANDSHAKE_LEN];
        out[0] = PROTOCOL.len() as u8;
        out[1..20].copy_from_slice(&self.protocol);
        out[20..28].copy_from_slice(&self.reserved);
        out[INFO_HASH_RANGE].copy_from_slice(&self.info_hash);
        out[48..].copy_from_slice(&self.peer_id);
        out
    }

    // Parses exactly one handshake, without checking the info hash.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HANDSHAKE_LEN {
            return Err(PeerError::MalformedFrame(format!(
                "handshake must be {} bytes, got {}", HANDSHAKE_LEN, bytes.len()
            )));
        }

        let mut src = bytes;
        if src.get_u8() as usize != PROTOCOL.len() {
            return Err(PeerError::IncorrectProtocol);
        }

        let mut protocol = [0; 19];
        src.copy_to_slice(&mut protocol);
        if protocol != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    // Checks the protocol and that the handshake is for the torrent we expect.
    pub fn validate(&self, expected_info_hash: &ID) -> Result<()> {
        if self.protocol != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }
        if &self.info_hash != expected_info_hash {
            tracing::error!(
                "peer sent wrong info hash, expected {} got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash),
            );
            return Err(PeerError::HandshakeMismatch);
        }
        Ok(())
    }
}

// Fails if either id is not 20 bytes long.
pub fn encode_handshake(info_hash: &[u8], peer_id: &[u8]) -> Result<[u8; HANDSHAKE_LEN]> {
    Ok(Handshake::new(to_id(info_hash)?, to_id(peer_id)?).to_bytes())
}

// Parses the peer's handshake and checks it is for the torrent we expect.
pub fn decode_handshake(bytes: &[u8], expected_info_hash: &ID) -> Result<Handshake> {
    let handshake = Handshake::parse(bytes)?;
    handshake.validate(expected_info_hash)?;
    Ok(handshake)
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&item.to_bytes());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.is_empty() {
            return Ok(None);
        }

        // Fail early on a bad length byte rather than waiting for 68 bytes.
        if src[0] as usize != PROTOCOL.len() {
            return Err(PeerError::IncorrectProtocol);
        }

        if src.len() < HANDSHAKE_LEN {
            // Handshake not fully recieved.
            src.reserve(HANDSHAKE_LEN - src.len());
            return Ok(None);
        }

        let frame = src.split_to(HANDSHAKE_LEN);
        Handshake::parse(&frame).map(Some)
    }

    // Stream ending part way through a handshake.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(handshake) => Ok(Some(handshake)),
            None if src.is_empty() => Ok(None),
            None => Err(PeerError::NoHandshake),
        }
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}
