use bytes::Bytes;
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    // Index of piece that the block is contained in.
    pub piece_idx: u32,

    // Offset in bytes of block within piece.
    pub offset: u32,

    // Data of block.
    pub data: Bytes,
}

impl BlockData {
    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            piece_idx: self.piece_idx,
            offset: self.offset,
            len: self.data.len() as u32,
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockInfo {

    pub piece_idx: u32,

    pub offset: u32,

    pub len: u32,

}

// Length of the block starting at the given offset in a piece.
pub fn block_len(piece_len: u32, offset: u32) -> u32 {
    BLOCK_SIZE.min(piece_len.saturating_sub(offset))
}
