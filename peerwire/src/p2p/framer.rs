use bytes::BytesMut;
use tokio_util::codec::Decoder;
use super::{message::{Message, MessageCodec}, Result};

// Turns the raw inbound byte stream into whole messages.
//
// The buffer is owned here and nowhere else. It holds only the unparsed tail
// of the stream, a message is removed from it before it is yielded.
pub struct InboundFramer {
    buf: BytesMut,
    codec: MessageCodec,
    // Set once a frame fails to decode, the stream can't be resynced.
    poisoned: bool,
}

impl InboundFramer {

    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: MessageCodec::new(max_frame_len),
            poisoned: false,
        }
    }

    // Appends newly read bytes and returns the messages they complete.
    // Bytes of a partially received message are held for the next call.
    pub fn feed(&mut self, new_bytes: &[u8]) -> Frames<'_> {
        if !self.poisoned {
            self.buf.extend_from_slice(new_bytes);
        }
        Frames { framer: self }
    }

    // Number of bytes waiting on the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// Lazily decodes messages from the framer's buffer.
pub struct Frames<'a> {
    framer: &'a mut InboundFramer,
}

impl Iterator for Frames<'_> {

    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        let framer = &mut *self.framer;
        if framer.poisoned {
            return None;
        }
        match framer.codec.decode(&mut framer.buf) {
            Ok(msg) => msg.map(Ok),
            Err(e) => {
                framer.poisoned = true;
                framer.buf.clear();
                Some(Err(e))
            },
        }
    }
}

impl std::iter::FusedIterator for Frames<'_> {}

impl std::fmt::Debug for InboundFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundFramer")
            .field("buffered", &self.buf.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
