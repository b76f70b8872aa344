use std::{fs, io::{Seek, SeekFrom, Write}, path::Path};
use crate::info::TorrentInfo;


#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("block of {len} bytes at offset {offset} overruns file of {file_len} bytes")]
    OutOfBounds {
        offset: u64,
        len: usize,
        file_len: u64,
    },

}

pub type Result<T> = std::result::Result<T, DiskError>;

// Receives block data as it arrives from a peer.
//
// Called synchronously from the session's dispatch path. A writer shared
// between several sessions must serialise its own writes.
pub trait BlockWriter: Send {
    fn write_block(&mut self, piece_idx: u32, offset: u32, data: &[u8]) -> Result<()>;
}

impl<W: BlockWriter + ?Sized> BlockWriter for Box<W> {
    fn write_block(&mut self, piece_idx: u32, offset: u32, data: &[u8]) -> Result<()> {
        (**self).write_block(piece_idx, offset, data)
    }
}

// Writes blocks into a single pre-allocated file.
#[derive(Debug)]
pub struct FileWriter {
    handle: fs::File,
    info: TorrentInfo,
    file_len: u64,
}

impl FileWriter {

    // The file must already exist, see `allocate`.
    pub fn open(path: &Path, info: TorrentInfo) -> Result<Self> {
        let handle = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let file_len = handle.metadata()?.len();
        tracing::info!("opened {:?} ({} bytes) for writing", path, file_len);
        Ok(Self { handle, info, file_len })
    }
}

impl BlockWriter for FileWriter {

    fn write_block(&mut self, piece_idx: u32, offset: u32, data: &[u8]) -> Result<()> {
        let pos = self.info.byte_offset(piece_idx, offset);
        if pos + data.len() as u64 > self.file_len {
            return Err(DiskError::OutOfBounds {
                offset: pos,
                len: data.len(),
                file_len: self.file_len,
            });
        }

        self.handle.seek(SeekFrom::Start(pos))?;
        self.handle.write_all(data)?;
        // Block must be on disk before we ask for the next one.
        self.handle.sync_data()?;

        tracing::trace!("wrote {} bytes at position {}", data.len(), pos);
        Ok(())
    }
}

// Creates a zero filled file of the final download size.
// An existing file is left untouched.
pub fn allocate(path: &Path, total_len: u64) -> Result<()> {
    if path.exists() {
        tracing::debug!("{:?} already exists, skipping allocation", path);
        return Ok(());
    }
    tracing::info!("creating file: {:?} ({} bytes)", path, total_len);
    let handle = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    handle.set_len(total_len)?;
    handle.sync_all()?;
    Ok(())
}
