use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::block::{BlockData, BlockInfo};
use super::{PeerError, Result};

// Length prefix preceding every frame.
pub const LEN_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // The keep alive message advises peers not to close the connection,
    // even if they haven’t received a message in some time.
    KeepAlive,

    // A choke message tells a peer that no further requests will be satisfied.
    Choke,

    // Conversely unchoke signifies that requests from the peer will be served.
    Unchoke,

    // Tells a peer that the client has a piece, referenced by the piece index.
    Have { idx: u32 },

    // Raw bitmap of the pieces a peer holds, most significant bit first.
    // Only the session knows the piece count, so it is left uninterpreted here.
    Bitfield(Bytes),

    // When a client wants to request data, they reference the index of the piece, the index
    // of the start of the block within the piece, and the length of the block (usually 16KB).
    Request(BlockInfo),

    // Clients send blocks in the piece message, referencing piece index and block offset.
    Piece(BlockData),

    // Any id we don't handle, kept verbatim.
    Unknown { id: u8, payload: Bytes },
}

impl Message {

    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Have { .. } => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request(_) => Some(6),
            Message::Piece(_) => Some(7),
            Message::Unknown { id, .. } => Some(*id),
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::KeepAlive | Message::Choke | Message::Unchoke => 0,
            Message::Have { .. } => 4,
            Message::Bitfield(raw) => raw.len(),
            Message::Request(_) => 12,
            Message::Piece(block) => 8 + block.data.len(),
            Message::Unknown { payload, .. } => payload.len(),
        }
    }

    // Writes the full frame, length prefix included.
    pub fn encode(&self, dst: &mut BytesMut) {
        let Some(id) = self.id() else {
            // [0, 0, 0, 0]
            dst.put_u32(0);
            return;
        };

        let payload_len = self.payload_len();
        dst.reserve(LEN_PREFIX + 1 + payload_len);
        dst.put_u32(1 + payload_len as u32);
        dst.put_u8(id);

        match self {
            Message::KeepAlive | Message::Choke | Message::Unchoke => {},

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => dst.put_u32(*idx),

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(raw) => dst.extend_from_slice(raw),

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.put_u32(block.len);
            },

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Piece(block) => {
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.extend_from_slice(&block.data);
            },

            Message::Unknown { payload, .. } => dst.extend_from_slice(payload),
        }
    }
}

fn expect_len(name: &str, payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(PeerError::MalformedFrame(format!(
            "{} payload must be {} bytes, got {}", name, len, payload.len()
        )));
    }
    Ok(())
}

// Builds a message from the id and payload of a single frame.
pub fn decode_message(id: u8, mut payload: Bytes) -> Result<Message> {
    let msg = match id {
        0 => {
            expect_len("choke", &payload, 0)?;
            Message::Choke
        },
        1 => {
            expect_len("unchoke", &payload, 0)?;
            Message::Unchoke
        },
        4 => {
            expect_len("have", &payload, 4)?;
            Message::Have { idx: payload.get_u32() }
        },
        5 => Message::Bitfield(payload),
        6 => {
            expect_len("request", &payload, 12)?;
            let piece_idx = payload.get_u32();
            let offset = payload.get_u32();
            let len = payload.get_u32();
            Message::Request(BlockInfo { piece_idx, offset, len })
        },
        7 => {
            if payload.len() < 8 {
                return Err(PeerError::MalformedFrame(format!(
                    "piece payload must be at least 8 bytes, got {}", payload.len()
                )));
            }
            let piece_idx = payload.get_u32();
            let offset = payload.get_u32();
            Message::Piece(BlockData { piece_idx, offset, data: payload })
        },
        id => {
            tracing::debug!("unknown message id: {}", id);
            Message::Unknown { id, payload }
        },
    };
    Ok(msg)
}

pub struct MessageCodec {
    max_frame_len: usize,
}

impl MessageCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Can't read message length.
        if src.len() < LEN_PREFIX { return Ok(None); }

        let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if msg_len == 0 {
            src.advance(LEN_PREFIX);
            return Ok(Some(Message::KeepAlive));
        }

        if msg_len > self.max_frame_len {
            return Err(PeerError::MalformedFrame(format!(
                "frame length {} exceeds maximum of {}", msg_len, self.max_frame_len
            )));
        }

        if src.len() < LEN_PREFIX + msg_len {
            // Haven't recieved all of message.
            src.reserve(LEN_PREFIX + msg_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let mut frame = src.split_to(msg_len).freeze();
        let id = frame.get_u8();
        decode_message(id, frame).map(Some)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(raw) => write!(f, "bitfield of {} bytes", raw.len()),
            Message::Request(block) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
            Message::Piece(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Unknown { id, payload } => write!(f, "unknown id {} with {} bytes", id, payload.len()),
        }
    }
}
