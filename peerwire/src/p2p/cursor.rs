use crate::{block::{block_len, BlockData, BlockInfo}, info::TorrentInfo};
use super::availability::Availability;

// Requests outstanding at once. Pipelining means raising this and tracking a
// queue of requests rather than a single slot.
pub const MAX_IN_FLIGHT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    // Nothing requested, waiting on an unchoke or the current piece.
    Idle,
    // A request is out.
    AwaitingBlock,
    // The last block finished a piece and the next request hasn't gone out yet.
    PieceComplete,
    // Every piece has been received.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    // Block was the one requested, the cursor moved past it.
    Accepted { piece_complete: bool },
    // Block didn't match the request and must not be written.
    Rejected,
}

// Walks the download sequentially, one block at a time.
#[derive(Debug)]
pub struct DownloadCursor {
    info: TorrentInfo,
    current_piece: u32,
    // Bytes already received within current_piece.
    current_offset: u32,
    // Whether the peer is answering our requests, starts choked.
    choked: bool,
    in_flight: Option<BlockInfo>,
    state: CursorState,
}

impl DownloadCursor {

    pub fn new(info: TorrentInfo) -> Self {
        Self {
            info,
            current_piece: 0,
            current_offset: 0,
            choked: true,
            in_flight: None,
            state: if info.num_pieces == 0 { CursorState::Done } else { CursorState::Idle },
        }
    }

    pub fn position(&self) -> (u32, u32) {
        (self.current_piece, self.current_offset)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn in_flight(&self) -> Option<BlockInfo> {
        self.in_flight
    }

    pub fn is_done(&self) -> bool {
        self.current_piece >= self.info.num_pieces
    }

    // Request the block at the cursor, if we are allowed to and the peer has it.
    pub fn maybe_request_next(&mut self, availability: &Availability) -> Option<BlockInfo> {
        if self.is_done() {
            self.state = CursorState::Done;
            return None;
        }
        if self.choked || self.in_flight.iter().len() >= MAX_IN_FLIGHT {
            return None;
        }
        if !availability.has(self.current_piece) {
            tracing::trace!("peer doesn't have piece {} yet", self.current_piece);
            if self.state != CursorState::PieceComplete {
                self.state = CursorState::Idle;
            }
            return None;
        }

        let request = BlockInfo {
            piece_idx: self.current_piece,
            offset: self.current_offset,
            len: block_len(self.info.piece_len(self.current_piece), self.current_offset),
        };
        self.in_flight = Some(request);
        self.state = CursorState::AwaitingBlock;
        Some(request)
    }

    // Checks an arriving block against the request and advances past it.
    pub fn on_block(&mut self, block: &BlockData) -> BlockOutcome {
        let Some(request) = self.in_flight else {
            tracing::warn!("unexpected block, nothing requested: {:?}", block.info());
            return BlockOutcome::Rejected;
        };

        let len = block.data.len() as u32;
        if block.piece_idx != request.piece_idx
            || block.offset != request.offset
            || len == 0
            || len > request.len
        {
            tracing::warn!("unexpected block: {:?}, expected {:?}", block.info(), request);
            return BlockOutcome::Rejected;
        }

        self.in_flight = None;
        self.current_offset += len;

        let piece_complete = self.current_offset >= self.info.piece_len(self.current_piece);
        if piece_complete {
            tracing::debug!("piece {} complete", self.current_piece);
            self.current_piece += 1;
            self.current_offset = 0;
            self.state = if self.is_done() { CursorState::Done } else { CursorState::PieceComplete };
        } else {
            self.state = CursorState::Idle;
        }

        BlockOutcome::Accepted { piece_complete }
    }

    // A request already sent is kept, the block may still arrive.
    pub fn on_choke(&mut self) {
        self.choked = true;
    }

    pub fn on_unchoke(&mut self, availability: &Availability) -> Option<BlockInfo> {
        let was_choked = std::mem::replace(&mut self.choked, false);
        // A choking peer discards queued requests, so ask again for the same block.
        // A repeated unchoke leaves the outstanding request alone.
        if was_choked {
            if let Some(request) = self.in_flight.take() {
                tracing::debug!("re-requesting block after unchoke: {:?}", request);
            }
        }
        self.maybe_request_next(availability)
    }

    // Called after the availability has grown.
    pub fn on_available(&mut self, availability: &Availability) -> Option<BlockInfo> {
        if availability.has(self.current_piece) {
            self.maybe_request_next(availability)
        } else {
            None
        }
    }
}
