use std::net::SocketAddr;
use tokio::sync::mpsc;
use crate::{fs::DiskError, ID};

mod session;
mod message;
mod handshake;
mod framer;
mod availability;
mod cursor;
mod exchange;
pub mod state;
#[cfg(test)]
mod tests;

pub use session::{PeerSession, Termination};
pub use message::{decode_message, Message, MessageCodec};
pub use handshake::{decode_handshake, encode_handshake, Handshake, HandshakeCodec, PROTOCOL};
pub use framer::{Frames, InboundFramer};
pub use availability::Availability;
pub use cursor::{BlockOutcome, CursorState, DownloadCursor, MAX_IN_FLIGHT};
pub use exchange::Exchange;

type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    HandshakeMismatch,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid peer address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("expected 20 byte id, got {0} bytes")]
    InvalidIdLength(usize),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("piece index {0} out of range")]
    InvalidPieceIndex(u32),

    #[error("connection timeout")]
    ConnectTimeout,

    #[error("disk: {0}")]
    Disk(#[from] DiskError),

    #[error("channel error: {0}")]
    Channel(String),
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer.
#[derive(Debug)]
pub enum PeerCommand {

    // End the peer session safely.
    Shutdown,

}

// Who we are talking to, and about which torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {

    pub address: SocketAddr,

    pub info_hash: ID,

    pub local_peer_id: ID,

}

impl PeerIdentity {

    pub fn new(address: SocketAddr, info_hash: ID, local_peer_id: ID) -> Self {
        Self { address, info_hash, local_peer_id }
    }

    // Both ids must be exactly 20 bytes.
    pub fn from_slices(
        ip: &str,
        port: u16,
        info_hash: &[u8],
        local_peer_id: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            address: SocketAddr::new(ip.parse()?, port),
            info_hash: to_id(info_hash)?,
            local_peer_id: to_id(local_peer_id)?,
        })
    }
}

pub(crate) fn to_id(bytes: &[u8]) -> Result<ID> {
    bytes.try_into().map_err(|_| PeerError::InvalidIdLength(bytes.len()))
}

#[derive(Debug)]
pub struct PeerHandle {

    // Sends commands to the session.
    pub peer_tx: PeerTx,

    // Handle to the peer session.
    pub session_handle: tokio::task::JoinHandle<Result<Termination>>,

}

impl PeerHandle {

    pub fn start_session<W>(
        mut session: PeerSession<W>,
        peer_tx: PeerTx,
        socket: Option<tokio::net::TcpStream>,
    ) -> PeerHandle
    where
        W: crate::fs::BlockWriter + 'static,
    {
        let session_handle = tokio::spawn(async move {
            session.start_session(socket).await
        });
        PeerHandle { peer_tx, session_handle }
    }

    // Closes the connection and waits for the session to finish.
    pub async fn shutdown(self) -> Result<Termination> {
        // Session may have already ended on its own.
        self.peer_tx.send(PeerCommand::Shutdown).ok();
        self.join().await
    }

    pub async fn join(self) -> Result<Termination> {
        self.session_handle
            .await
            .map_err(|e| PeerError::Channel(e.to_string()))?
    }
}
