use std::time::Instant;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time,
};
use tokio_util::codec::Framed;
use crate::{config::Config, fs::BlockWriter, info::TorrentInfo, ID};
use super::{
    *,
    exchange::Exchange,
    framer::InboundFramer,
    handshake::*,
    message::Message,
    state::*,
};

// How a session ended, when it wasn't an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {

    // Every piece was received and written.
    Complete,

    // Peer closed the connection.
    PeerDisconnected,

    // Told to stop through a PeerCommand.
    Shutdown,

}

pub struct PeerSession<W> {

    identity: PeerIdentity,

    // Piece layout of the download.
    info: TorrentInfo,

    config: Config,

    // Where received blocks go.
    writer: W,

    // Commands to the peer.
    peer_rx: PeerRx,

    state: SessionState,

    // Id the peer sent in its handshake.
    remote_id: Option<ID>,

}

impl<W: BlockWriter> PeerSession<W> {

    pub fn new(
        identity: PeerIdentity,
        info: TorrentInfo,
        writer: W,
        config: Config,
    ) -> (PeerSession<W>, PeerTx) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        (
            PeerSession {
                identity,
                info,
                config,
                writer,
                peer_rx,
                state: SessionState::default(),
                remote_id: None,
            },
            peer_tx,
        )
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn remote_id(&self) -> Option<ID> {
        self.remote_id
    }

    // Runs the connection to completion. An already connected stream can be
    // passed in, otherwise one is opened to the peer's address.
    #[tracing::instrument(name = "peer", skip(self, stream), fields(address = %self.identity.address))]
    pub async fn start_session(&mut self, stream: Option<TcpStream>) -> Result<Termination> {
        let res = self.connect_and_run(stream).await;
        self.state.transition(ConnState::Closed);
        match &res {
            Ok(termination) => tracing::info!("session closed: {:?}", termination),
            Err(e) => tracing::error!("session failed: {}", e),
        }
        res
    }

    async fn connect_and_run(&mut self, stream: Option<TcpStream>) -> Result<Termination> {
        let stream = if let Some(stream) = stream {
            stream
        } else {
            let stream = time::timeout(self.config.connect_timeout, TcpStream::connect(self.identity.address))
                .await
                .map_err(|_| PeerError::ConnectTimeout)??;
            tracing::trace!("outbound connection successful");
            stream
        };

        let mut socket = Framed::new(stream, HandshakeCodec);
        self.exchange_handshake(&mut socket).await?;

        // Anything the peer sent straight after its handshake is already buffered.
        let parts = socket.into_parts();
        self.run(parts.io, &parts.read_buf).await
    }

    async fn exchange_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>) -> Result<()> {

        let handshake = Handshake::new(self.identity.info_hash, self.identity.local_peer_id);
        tracing::info!("send handshake");
        socket.send(handshake).await?;

        tracing::trace!("waiting for handshake");
        let handshake = match time::timeout(self.config.handshake_timeout, socket.next()).await {
            Ok(Some(handshake)) => handshake?,
            Ok(None) | Err(_) => return Err(PeerError::NoHandshake),
        };
        handshake.validate(&self.identity.info_hash)?;
        tracing::info!("read: {:?}", handshake);
        self.remote_id = Some(handshake.peer_id);

        self.state.transition(ConnState::Active);
        tracing::info!("handshake successful, peer connected");
        Ok(())
    }

    async fn run(&mut self, mut stream: TcpStream, leftover: &[u8]) -> Result<Termination> {

        // Connection scoped state, dropped whichever way the loop ends.
        let mut framer = InboundFramer::new(self.config.max_frame_len);
        let mut exchange = Exchange::new(self.info, &mut self.writer);
        let mut read_buf = vec![0; self.config.read_buf_len.max(leftover.len())];
        let mut outbox = Vec::new();
        let mut last_write = Instant::now();

        if exchange.is_complete() {
            return Ok(Termination::Complete);
        }

        // Bytes in read_buf waiting to be framed.
        read_buf[..leftover.len()].copy_from_slice(leftover);
        let mut pending = leftover.len();

        loop {

            if pending == 0 { tokio::select! {

                // Data from peer.
                res = time::timeout(self.config.read_timeout, stream.read(&mut read_buf)) => {
                    match res {
                        Ok(n) => pending = n?,
                        Err(_) => {
                            tracing::trace!("read timed out");
                            if last_write.elapsed() >= self.config.keep_alive_interval {
                                outbox.push(Message::KeepAlive);
                            }
                            if send_messages(&mut stream, &mut outbox).await? {
                                last_write = Instant::now();
                            }
                            continue;
                        },
                    }

                    if pending == 0 {
                        tracing::info!("peer disconnected");
                        return Ok(Termination::PeerDisconnected);
                    }
                },

                // Command from elsewhere in application.
                Some(cmd) = self.peer_rx.recv() => match cmd {
                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        return Ok(Termination::Shutdown);
                    },
                },

            }}

            for msg in framer.feed(&read_buf[..pending]) {
                let msg = msg?;
                tracing::trace!("read: {}", msg);
                exchange.handle_msg(msg, &mut outbox)?;
            }
            pending = 0;

            // A peer that talks more often than the read timeout still gets keep alives.
            if outbox.is_empty() && last_write.elapsed() >= self.config.keep_alive_interval {
                outbox.push(Message::KeepAlive);
            }
            if send_messages(&mut stream, &mut outbox).await? {
                last_write = Instant::now();
            }

            self.state.update(|state| {
                state.peer_choking = exchange.cursor().is_choked();
                state.peer_pieces = exchange.availability().count();
                state.downloaded = exchange.downloaded();
            });

            if exchange.is_complete() {
                tracing::info!("download complete, {} bytes", exchange.downloaded());
                return Ok(Termination::Complete);
            }
        }
    }
}

// Encodes and writes everything queued, returns whether anything was sent.
async fn send_messages(stream: &mut TcpStream, outbox: &mut Vec<Message>) -> Result<bool> {
    if outbox.is_empty() {
        return Ok(false);
    }
    let mut buf = BytesMut::new();
    for msg in outbox.drain(..) {
        tracing::info!("send: {}", msg);
        msg.encode(&mut buf);
    }
    stream.write_all(&buf).await?;
    Ok(true)
}

impl<W> std::fmt::Debug for PeerSession<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("identity", &self.identity)
            .field("info", &self.info)
            .field("state", &self.state)
            .finish()
    }
}
