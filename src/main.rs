mod bitfield;
mod completion;
mod config;
mod context;
mod error;
mod logging;
mod peer;
mod piece_registry;
mod scheduler;
mod storage;
mod wire;

use std::net::{TcpListener, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use config::{CommonConfig, PeerTableEntry};
use context::SwarmContext;
use logging::ActivityLog;
use peer::{LinkSet, PeerLink};
use piece_registry::PieceRegistry;
use scheduler::ChokeScheduler;
use storage::FileStorage;

/// How often the completion watcher polls for swarm-wide completion.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Floor for the socket read timeout, independent of `UnchokingInterval`. A short unchoking
/// interval shouldn't be able to push the read timeout below a sane minimum and cause spurious
/// disconnects during quiet periods.
const MIN_READ_TIMEOUT: Duration = Duration::from_secs(15);

const COMMON_CONFIG_PATH: &str = "PeerInfo.cfg";
const PEER_TABLE_PATH: &str = "PeerInfoTable.cfg";

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// a peer process in a fixed-swarm, BitTorrent-style file-sharing network.
struct Cli {
    #[arg(required = true)]
    /// this process's peer id, as it appears in PeerInfoTable.cfg.
    peer_id: u32,
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let common = CommonConfig::load(COMMON_CONFIG_PATH)?;
    let table = PeerTableEntry::load_table(PEER_TABLE_PATH)?;

    let local_pos = table
        .iter()
        .position(|entry| entry.id == cli.peer_id)
        .ok_or(error::ConfigError::UnknownLocalPeerId(cli.peer_id))?;
    let local_entry = &table[local_pos];

    let num_pieces = common.num_pieces() as usize;
    let read_timeout = common.unchoking_interval.max(MIN_READ_TIMEOUT);
    let max_frame_len = common.piece_size + 16;

    let working_dir = PathBuf::from(local_entry.id.to_string());
    std::fs::create_dir_all(&working_dir)?;

    let storage = Arc::new(FileStorage::open(
        working_dir.join(&common.file_name),
        common.file_size,
        common.piece_size,
    )?);

    let registry = Arc::new(PieceRegistry::new(num_pieces, local_entry.has_file));
    let log = Arc::new(ActivityLog::open(cli.peer_id)?);
    let links = Arc::new(LinkSet::new());

    let ctx = Arc::new(SwarmContext {
        local_peer_id: cli.peer_id,
        registry,
        storage,
        links,
        log,
        num_pieces,
        piece_size: common.piece_size,
        max_frame_len,
        read_timeout,
    });

    let scheduler = ChokeScheduler::new(ctx.clone(), common.number_of_preferred_neighbors as usize);
    scheduler.spawn(common.unchoking_interval, common.optimistic_unchoking_interval);

    completion::spawn(ctx.clone(), COMPLETION_POLL_INTERVAL);

    spawn_accept_loop(local_entry.port, ctx.clone());

    // Dial every peer listed before our own row; later rows dial us instead once they start up.
    for entry in &table[..local_pos] {
        dial_with_retry(entry, ctx.clone());
    }

    // Nothing left for the main thread to do: every activity (accept, dial receive loops, the two
    // schedulers, the completion watcher) now lives on its own detached thread. Block forever so
    // the process stays alive for them; the completion watcher is the only thing that calls
    // `std::process::exit`.
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn spawn_accept_loop(port: u16, ctx: Arc<SwarmContext>) {
    std::thread::spawn(move || {
        let listener = match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(%port, error = %err, "accept loop could not bind; no inbound peers will connect");
                return;
            }
        };

        for incoming in listener.incoming() {
            match incoming {
                Ok(stream) => {
                    let ctx = ctx.clone();
                    std::thread::spawn(move || {
                        if let Err(err) = PeerLink::accept(stream, ctx) {
                            tracing::info!(error = %err, "inbound handshake failed");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept() failed; continuing to listen");
                }
            }
        }
    });
}

/// Dials `entry` with a few bounded retries, since an earlier peer in the table may not have
/// finished binding its listener yet when this peer starts.
fn dial_with_retry(entry: &PeerTableEntry, ctx: Arc<SwarmContext>) {
    let entry = entry.clone();
    std::thread::spawn(move || {
        const MAX_ATTEMPTS: u32 = 10;
        const RETRY_DELAY: Duration = Duration::from_millis(500);

        let addr = format!("{}:{}", entry.host, entry.port);
        let socket_addr = match addr.to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
            Some(socket_addr) => socket_addr,
            None => {
                tracing::warn!(peer = entry.id, %addr, "could not resolve peer table address");
                return;
            }
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match PeerLink::connect(socket_addr, ctx.clone()) {
                Ok(_) => return,
                Err(err) => {
                    tracing::info!(peer = entry.id, attempt, error = %err, "dial failed, retrying");
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
        tracing::error!(peer = entry.id, %addr, "giving up dialing peer after max attempts");
    });
}
