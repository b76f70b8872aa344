use std::{net::SocketAddr, time::Duration};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;
use crate::{
    block::{BlockData, BlockInfo},
    config::Config,
    fs::{self, BlockWriter, FileWriter},
    info::TorrentInfo,
    BLOCK_SIZE,
    ID,
};
use super::{handshake::HANDSHAKE_LEN, state::ConnState, *};

const INFO_HASH: ID = *b"12345678901234567890";
const CLIENT_ID: ID = *b"-PC0001-999999999999";
const MOCK_ID: ID = *b"-MK0001-123456789012";

fn test_config() -> Config {
    Config {
        client_id: CLIENT_ID,
        read_timeout: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn session<W: BlockWriter>(addr: SocketAddr, info: TorrentInfo, writer: W, config: Config) -> (PeerSession<W>, PeerTx) {
    PeerSession::new(PeerIdentity::new(addr, INFO_HASH, CLIENT_ID), info, writer, config)
}

// Byte written for every position of a block, so offsets can be checked on disk.
fn fill_byte(piece_idx: u32, offset: u32) -> u8 {
    (piece_idx * 2 + offset / BLOCK_SIZE + 1) as u8
}

// Reads the client handshake and replies with our own.
async fn accept_handshake(listener: &TcpListener, info_hash: ID) -> TcpStream {
    let (mut conn, _) = listener.accept().await.unwrap();
    let mut buf = [0; HANDSHAKE_LEN];
    conn.read_exact(&mut buf).await.unwrap();
    let theirs = decode_handshake(&buf, &INFO_HASH).unwrap();
    assert_eq!(theirs.peer_id, CLIENT_ID);
    conn.write_all(&Handshake::new(info_hash, MOCK_ID).to_bytes()).await.unwrap();
    conn
}

// Serves every request with generated data, writing each reply in small chunks
// so the client has to reassemble it across reads. Returns the requests seen.
fn spawn_seeder(listener: TcpListener, bitfield: &'static [u8]) -> JoinHandle<Vec<BlockInfo>> {
    tokio::spawn(async move {
        let mut conn = accept_handshake(&listener, INFO_HASH).await;

        let mut intro = BytesMut::new();
        Message::Bitfield(bytes::Bytes::from_static(bitfield)).encode(&mut intro);
        Message::Unchoke.encode(&mut intro);
        conn.write_all(&intro).await.unwrap();

        let mut requests = vec![];
        loop {
            let mut len = [0; 4];
            if conn.read_exact(&mut len).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len) as usize;
            if len == 0 {
                continue;
            }
            let mut body = vec![0; len];
            conn.read_exact(&mut body).await.unwrap();
            let msg = decode_message(body[0], bytes::Bytes::from(body).slice(1..)).unwrap();

            if let Message::Request(block) = msg {
                requests.push(block);
                let mut reply = BytesMut::new();
                Message::Piece(BlockData {
                    piece_idx: block.piece_idx,
                    offset: block.offset,
                    data: vec![fill_byte(block.piece_idx, block.offset); block.len as usize].into(),
                }).encode(&mut reply);
                for chunk in reply.chunks(1500) {
                    conn.write_all(chunk).await.unwrap();
                    conn.flush().await.unwrap();
                    tokio::task::yield_now().await;
                }
            }
        }
        requests
    })
}

#[tokio::test]
async fn test_download_to_file() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let mock = spawn_seeder(listener, &[0xff]);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("download.bin");
    let info = TorrentInfo::uniform(2, 32_768).unwrap();
    fs::allocate(&path, info.total_len)?;
    let writer = FileWriter::open(&path, info)?;

    let (mut session, _peer_tx) = session(addr, info, writer, test_config());
    let termination = session.start_session(None).await?;
    assert_eq!(termination, Termination::Complete);
    assert_eq!(session.state().conn_state, ConnState::Closed);
    assert_eq!(session.state().downloaded, 65_536);
    assert_eq!(session.state().peer_pieces, 2);
    assert_eq!(session.remote_id(), Some(MOCK_ID));
    drop(session);

    let requests = mock.await?;
    assert_eq!(requests, vec![
        BlockInfo { piece_idx: 0, offset: 0, len: BLOCK_SIZE },
        BlockInfo { piece_idx: 0, offset: BLOCK_SIZE, len: BLOCK_SIZE },
        BlockInfo { piece_idx: 1, offset: 0, len: BLOCK_SIZE },
        BlockInfo { piece_idx: 1, offset: BLOCK_SIZE, len: BLOCK_SIZE },
    ]);

    let data = std::fs::read(&path)?;
    for (i, chunk) in data.chunks(BLOCK_SIZE as usize).enumerate() {
        let expected = fill_byte(i as u32 / 2, (i as u32 % 2) * BLOCK_SIZE);
        assert!(chunk.iter().all(|&b| b == expected), "block {} has wrong contents", i);
    }
    Ok(())
}

#[tokio::test]
async fn test_short_last_piece_download() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let mock = spawn_seeder(listener, &[0xe0]);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("download.bin");
    let info = TorrentInfo::new(2 * 32_768 + 1000, 32_768).unwrap();
    fs::allocate(&path, info.total_len)?;

    let (mut session, _peer_tx) = session(addr, info, FileWriter::open(&path, info)?, test_config());
    assert_eq!(session.start_session(None).await?, Termination::Complete);
    drop(session);

    let requests = mock.await?;
    assert_eq!(requests.last(), Some(&BlockInfo { piece_idx: 2, offset: 0, len: 1000 }));
    assert_eq!(std::fs::read(&path)?.len(), 2 * 32_768 + 1000);
    Ok(())
}

#[tokio::test]
async fn test_handshake_mismatch_never_active() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let (conn, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(conn, HandshakeCodec);
        let theirs = framed.next().await.unwrap().unwrap();
        assert_eq!(theirs.info_hash, INFO_HASH);
        framed.send(Handshake::new([0xee; 20], MOCK_ID)).await.unwrap();
        // Client should hang up without sending anything else.
        assert!(framed.into_inner().read(&mut [0; 16]).await.unwrap() == 0);
    });

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Err(PeerError::HandshakeMismatch)));
    assert_eq!(session.state().conn_state, ConnState::Closed);
    assert!(session.state().active_since.is_none());
    drop(session);
    mock.await.unwrap();
}

#[tokio::test]
async fn test_peer_disconnect_is_clean() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let mut conn = accept_handshake(&listener, INFO_HASH).await;
        let mut buf = BytesMut::new();
        Message::Bitfield(bytes::Bytes::from_static(&[0x80])).encode(&mut buf);
        conn.write_all(&buf).await.unwrap();
    });

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Ok(Termination::PeerDisconnected)));
    assert!(session.state().active_since.is_some());
    assert_eq!(session.state().peer_pieces, 1);
    mock.await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let mut conn = accept_handshake(&listener, INFO_HASH).await;
        // Have with a 3 byte index.
        conn.write_all(&[0, 0, 0, 4, 4, 0, 0, 1]).await.unwrap();
        let _ = conn.read(&mut [0; 16]).await;
    });

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Err(PeerError::MalformedFrame(_))));
    assert_eq!(session.state().conn_state, ConnState::Closed);
    drop(session);
    mock.await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_after_read_timeout() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let conn = accept_handshake(&listener, INFO_HASH).await;
        let mut framed = Framed::new(conn, MessageCodec::default());
        let msg = framed.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::KeepAlive);
    });

    let config = Config {
        keep_alive_interval: Duration::ZERO,
        ..test_config()
    };
    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, config);
    let res = session.start_session(None).await;
    assert!(matches!(res, Ok(Termination::PeerDisconnected)));
    mock.await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_while_peer_is_chatty() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let conn = accept_handshake(&listener, INFO_HASH).await;
        let mut framed = Framed::new(conn, MessageCodec::default());
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        // Keep the connection busy well inside the client's read timeout.
        loop { tokio::select! {
            msg = framed.next() => {
                assert_eq!(msg.unwrap().unwrap(), Message::KeepAlive);
                break;
            },
            _ = ticker.tick() => framed.send(Message::Have { idx: 0 }).await.unwrap(),
        }}
    });

    let config = Config {
        read_timeout: Duration::from_secs(10),
        keep_alive_interval: Duration::from_millis(150),
        ..test_config()
    };
    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, config);
    let res = tokio::time::timeout(Duration::from_secs(5), session.start_session(None)).await;
    assert!(matches!(res, Ok(Ok(Termination::PeerDisconnected))));
    mock.await.unwrap();
}

// Messages sent in the same write as the handshake must not be lost.
#[tokio::test]
async fn test_messages_after_handshake_in_same_write() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = [0; HANDSHAKE_LEN];
        conn.read_exact(&mut buf).await.unwrap();

        let mut reply = BytesMut::from(&Handshake::new(INFO_HASH, MOCK_ID).to_bytes()[..]);
        Message::Bitfield(bytes::Bytes::from_static(&[0xc0])).encode(&mut reply);
        Message::Unchoke.encode(&mut reply);
        conn.write_all(&reply).await.unwrap();

        let mut framed = Framed::new(conn, MessageCodec::default());
        framed.next().await.unwrap().unwrap()
    });

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Ok(Termination::PeerDisconnected)));
    assert_eq!(session.state().peer_pieces, 2);
    assert!(!session.state().peer_choking);
    assert_eq!(mock.await.unwrap(), Message::Request(BlockInfo { piece_idx: 0, offset: 0, len: BLOCK_SIZE }));
}

#[tokio::test]
async fn test_truncated_handshake() {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = [0; HANDSHAKE_LEN];
        conn.read_exact(&mut buf).await.unwrap();
        conn.write_all(&Handshake::new(INFO_HASH, MOCK_ID).to_bytes()[..30]).await.unwrap();
    });

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Err(PeerError::NoHandshake)));
    assert!(session.state().active_since.is_none());
    mock.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_through_handle() -> anyhow::Result<()> {
    let (listener, addr) = listen().await;
    let mock = tokio::spawn(async move {
        let conn = accept_handshake(&listener, INFO_HASH).await;
        let mut framed = Framed::new(conn, MessageCodec::default());
        // Stay choked until the client goes away.
        while let Some(Ok(_)) = framed.next().await {}
    });

    let (session, peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let handle = PeerHandle::start_session(session, peer_tx, None);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(handle.shutdown().await?, Termination::Shutdown);
    mock.await?;
    Ok(())
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nothing listens on.
    let (listener, addr) = listen().await;
    drop(listener);

    let (mut session, _peer_tx) = session(addr, TorrentInfo::uniform(2, 32_768).unwrap(), NullWriter, test_config());
    let res = session.start_session(None).await;
    assert!(matches!(res, Err(PeerError::Io(_))));
}

struct NullWriter;

impl BlockWriter for NullWriter {
    fn write_block(&mut self, _: u32, _: u32, _: &[u8]) -> crate::fs::Result<()> {
        Ok(())
    }
}
