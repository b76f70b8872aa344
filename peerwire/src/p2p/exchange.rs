use crate::{fs::BlockWriter, info::TorrentInfo};
use super::{
    availability::Availability,
    cursor::{BlockOutcome, DownloadCursor},
    message::Message,
    Result,
};

// Per-connection download logic, free of any socket.
//
// Each inbound message is applied to the availability and cursor, and any
// messages to send back are pushed to the outbox.
pub struct Exchange<'w, W: ?Sized> {
    availability: Availability,
    cursor: DownloadCursor,
    writer: &'w mut W,
    // Bytes accepted and written.
    downloaded: u64,
}

impl<'w, W: BlockWriter + ?Sized> Exchange<'w, W> {

    pub fn new(info: TorrentInfo, writer: &'w mut W) -> Self {
        Self {
            availability: Availability::new(info.num_pieces),
            cursor: DownloadCursor::new(info),
            writer,
            downloaded: 0,
        }
    }

    pub fn handle_msg(&mut self, msg: Message, outbox: &mut Vec<Message>) -> Result<()> {
        let request = match msg {

            Message::KeepAlive => None,

            Message::Choke => {
                self.cursor.on_choke();
                None
            },

            Message::Unchoke => self.cursor.on_unchoke(&self.availability),

            Message::Have { idx } => {
                let added = self.availability.mark_have(idx)?;
                if added && idx == self.cursor.position().0 {
                    self.cursor.on_available(&self.availability)
                } else {
                    None
                }
            },

            Message::Bitfield(raw) => {
                self.availability.reset();
                self.availability.apply_bitfield(&raw);
                tracing::info!("peer has {}/{} pieces", self.availability.count(), self.availability.num_pieces());
                self.cursor.on_available(&self.availability)
            },

            Message::Piece(block) => match self.cursor.on_block(&block) {
                BlockOutcome::Accepted { piece_complete } => {
                    self.writer.write_block(block.piece_idx, block.offset, &block.data)?;
                    self.downloaded += block.data.len() as u64;
                    if piece_complete {
                        tracing::info!("piece {} downloaded", block.piece_idx);
                    }
                    self.cursor.maybe_request_next(&self.availability)
                },
                BlockOutcome::Rejected => None,
            },

            // We only download, requests from the peer go unanswered.
            Message::Request(block) => {
                tracing::debug!("ignoring request from peer: {:?}", block);
                None
            },

            Message::Unknown { id, .. } => {
                tracing::debug!("ignoring message with id {}", id);
                None
            },
        };

        if let Some(block) = request {
            outbox.push(Message::Request(block));
        }
        Ok(())
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn cursor(&self) -> &DownloadCursor {
        &self.cursor
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn is_complete(&self) -> bool {
        self.cursor.is_done()
    }
}
