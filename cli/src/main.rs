use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use peerwire::{
    fs,
    Config,
    FileWriter,
    PeerHandle,
    PeerIdentity,
    PeerSession,
    Termination,
    TorrentInfo,
};

#[derive(Parser)]
struct Args {
    #[arg(help = "Peer IP address")]
    ip: String,

    #[arg(help = "Peer port")]
    port: u16,

    #[arg(long, help = "Info hash as 40 hex characters")]
    info_hash: String,

    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), help = "Length of each piece in bytes")]
    piece_len: u32,

    #[arg(long, help = "Length of the whole download in bytes")]
    total_len: u64,

    #[arg(short, long, help = "File to write the download to")]
    output: PathBuf,

    #[arg(long, help = "20 byte peer id, random if not given")]
    peer_id: Option<String>,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    let args = Args::parse();

    // Set up logging.
    let level = if args.verbose { tracing::Level::TRACE } else { tracing::Level::INFO };
    let sub = tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(tracing_subscriber::fmt::format())
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let info_hash = hex::decode(&args.info_hash).context("info hash is not hex")?;
    let config = Config::default();
    let peer_id = match &args.peer_id {
        Some(id) => id.as_bytes().to_vec(),
        None => config.client_id.to_vec(),
    };
    let identity = PeerIdentity::from_slices(&args.ip, args.port, &info_hash, &peer_id)?;
    let config = Config { client_id: identity.local_peer_id, ..config };

    let info = TorrentInfo::new(args.total_len, args.piece_len)?;
    fs::allocate(&args.output, info.total_len)?;
    let writer = FileWriter::open(&args.output, info)?;

    let (session, peer_tx) = PeerSession::new(identity, info, writer, config);
    let mut handle = PeerHandle::start_session(session, peer_tx, None);

    let termination = tokio::select! {
        res = &mut handle.session_handle => res??,
        _ = tokio::signal::ctrl_c() => handle.shutdown().await?,
    };

    match termination {
        Termination::Complete => println!("download complete: {}", args.output.display()),
        Termination::PeerDisconnected => println!("peer disconnected before download finished"),
        Termination::Shutdown => println!("stopped"),
    }
    Ok(())
}
