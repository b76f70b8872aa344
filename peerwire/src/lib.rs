mod block;
mod config;
mod info;
pub mod fs;
pub mod p2p;

// Most commonly used block size - 16KB.
pub const BLOCK_SIZE: u32 = 0x4000;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// 20 byte SHA1 info hash, also used for peer ids.
pub type ID = [u8; 20];

// Re-exports
pub use block::{BlockData, BlockInfo, block_len};
pub use config::{Config, generate_peer_id};
pub use info::{InfoError, TorrentInfo};
pub use fs::{BlockWriter, DiskError, FileWriter};
pub use p2p::{
    PeerCommand,
    PeerError,
    PeerHandle,
    PeerIdentity,
    PeerSession,
    Termination,
    state::{ConnState, SessionState},
};
