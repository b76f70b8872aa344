#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InfoError {

    #[error("piece length must be non-zero")]
    ZeroPieceLen,

    #[error("{0} bytes needs more than u32::MAX pieces")]
    TooManyPieces(u64),

}

pub type Result<T> = std::result::Result<T, InfoError>;

// Static download parameters, fixed for the life of a session.
// Very widely used, often cloned but is cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentInfo {

    pub total_len: u64,

    pub piece_len: u32,

    pub last_piece_len: u32,

    pub num_pieces: u32,

}

impl TorrentInfo {

    // Every piece has the same length.
    pub fn uniform(num_pieces: u32, piece_len: u32) -> Result<Self> {
        if piece_len == 0 {
            return Err(InfoError::ZeroPieceLen);
        }
        Ok(Self {
            total_len: num_pieces as u64 * piece_len as u64,
            piece_len,
            last_piece_len: piece_len,
            num_pieces,
        })
    }

    // Derives the piece count from the total length, the last piece may be short.
    pub fn new(total_len: u64, piece_len: u32) -> Result<Self> {
        if piece_len == 0 {
            return Err(InfoError::ZeroPieceLen);
        }
        let num_pieces: u32 = total_len
            .div_ceil(piece_len as u64)
            .try_into()
            .map_err(|_| InfoError::TooManyPieces(total_len))?;
        let last_piece_len = if num_pieces == 0 {
            0
        } else {
            (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as u32
        };

        Ok(Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
        })
    }

    // Returns length of piece given its index.
    pub fn piece_len(&self, idx: u32) -> u32 {
        if idx + 1 == self.num_pieces {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    // Absolute byte offset of a block within the whole download.
    pub fn byte_offset(&self, piece_idx: u32, offset: u32) -> u64 {
        piece_idx as u64 * self.piece_len as u64 + offset as u64
    }
}
