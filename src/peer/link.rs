use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bitfield::Bitfield;
use crate::context::SwarmContext;
use crate::error::LinkError;
use crate::wire::{Handshake, Message};

/// Whether this link was dialed by us or accepted from a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One instance per TCP connection. Owns its socket and send-side serialization, and holds
/// all per-link state: neighbor bitfield, choke/interest flags, in-flight request, download byte
/// counter.
pub struct PeerLink {
    remote_peer_id: u32,
    remote_addr: SocketAddr,
    direction: Direction,
    writer: Mutex<TcpStream>,
    neighbor_bitfield: Mutex<Option<Bitfield>>,
    am_choked_by_neighbor: AtomicBool,
    i_choke_neighbor: AtomicBool,
    neighbor_interested_in_me: AtomicBool,
    awaiting_piece: AtomicBool,
    bytes_from_neighbor_this_interval: AtomicU64,
    ctx: Arc<SwarmContext>,
}

impl PeerLink {
    /// Dials `addr`, performs the symmetric handshake, and spawns the receive-loop thread.
    pub fn connect(addr: SocketAddr, ctx: Arc<SwarmContext>) -> Result<Arc<Self>, LinkError> {
        let stream = TcpStream::connect(addr)?;
        Self::handshake_and_spawn(stream, addr, Direction::Outbound, ctx)
    }

    /// Wraps an accepted inbound socket, performs the symmetric handshake, and spawns the
    /// receive-loop thread.
    pub fn accept(stream: TcpStream, ctx: Arc<SwarmContext>) -> Result<Arc<Self>, LinkError> {
        let addr = stream.peer_addr()?;
        Self::handshake_and_spawn(stream, addr, Direction::Inbound, ctx)
    }

    fn handshake_and_spawn(
        stream: TcpStream,
        remote_addr: SocketAddr,
        direction: Direction,
        ctx: Arc<SwarmContext>,
    ) -> Result<Arc<Self>, LinkError> {
        stream.set_nodelay(true)?;

        // Write our handshake before reading theirs, same on both sides regardless of direction.
        Handshake::new(ctx.local_peer_id).write_to(&stream)?;
        let remote_handshake = Handshake::read_from(&stream)?;

        stream.set_read_timeout(Some(ctx.read_timeout))?;

        let reader = stream.try_clone()?;

        let link = Arc::new(Self {
            remote_peer_id: remote_handshake.peer_id,
            remote_addr,
            direction,
            writer: Mutex::new(stream),
            neighbor_bitfield: Mutex::new(None),
            am_choked_by_neighbor: AtomicBool::new(true),
            i_choke_neighbor: AtomicBool::new(true),
            neighbor_interested_in_me: AtomicBool::new(false),
            awaiting_piece: AtomicBool::new(false),
            bytes_from_neighbor_this_interval: AtomicU64::new(0),
            ctx: ctx.clone(),
        });

        match direction {
            Direction::Outbound => ctx.log.log(format!(
                "Peer {} makes a connection to Peer {}.",
                ctx.local_peer_id, link.remote_peer_id
            )),
            Direction::Inbound => ctx.log.log(format!(
                "Peer {} is connected from Peer {}.",
                ctx.local_peer_id, link.remote_peer_id
            )),
        }

        ctx.links.insert(link.clone());

        // Always send our bitfield before entering the receive loop, even if it's all zeros.
        let snapshot = ctx.registry.snapshot();
        link.send(Message::Bitfield(snapshot.to_bytes()))?;

        let loop_link = link.clone();
        std::thread::spawn(move || loop_link.run(reader));

        Ok(link)
    }

    pub fn remote_peer_id(&self) -> u32 {
        self.remote_peer_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn neighbor_interested_in_me(&self) -> bool {
        self.neighbor_interested_in_me.load(Ordering::SeqCst)
    }

    pub fn i_choke_neighbor(&self) -> bool {
        self.i_choke_neighbor.load(Ordering::SeqCst)
    }

    pub fn am_choked_by_neighbor(&self) -> bool {
        self.am_choked_by_neighbor.load(Ordering::SeqCst)
    }

    /// Whether the neighbor's last known bitfield (kept current by every `have` frame) reports
    /// the full file. `false` before any bitfield/have frame has arrived.
    pub fn neighbor_is_complete(&self) -> bool {
        match self.neighbor_bitfield.lock().expect("neighbor bitfield mutex poisoned").as_ref() {
            Some(bits) => crate::piece_registry::PieceRegistry::bitfield_is_complete(bits),
            None => false,
        }
    }

    /// Reads and zeroes the per-interval download byte counter.
    pub fn take_bytes_this_interval(&self) -> u64 {
        self.bytes_from_neighbor_this_interval.swap(0, Ordering::SeqCst)
    }

    /// Test-only rigging for scheduler tests that need a link in a specific state without a real
    /// handshake on the wire.
    #[cfg(test)]
    pub(crate) fn mark_interested_for_test(&self) {
        self.neighbor_interested_in_me.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn add_bytes_for_test(&self, bytes: u64) {
        self.bytes_from_neighbor_this_interval.fetch_add(bytes, Ordering::SeqCst);
    }

    /// No-op if `choke` already matches the current state; otherwise flips it and sends the
    /// corresponding control frame. I/O errors are swallowed — the receive loop will notice the
    /// dead socket and tear the link down on its own.
    pub fn set_choked(&self, choke: bool) {
        let previous = self.i_choke_neighbor.swap(choke, Ordering::SeqCst);
        if previous == choke {
            return;
        }

        let msg = if choke { Message::Choke } else { Message::Unchoke };
        if self.send(msg).is_err() {
            return;
        }

        if choke {
            self.ctx.log.log(format!(
                "Peer {} choking Peer {}.",
                self.ctx.local_peer_id, self.remote_peer_id
            ));
        } else {
            self.ctx.log.log(format!(
                "Peer {} unchoking Peer {}.",
                self.ctx.local_peer_id, self.remote_peer_id
            ));
        }
    }

    fn send(&self, msg: Message) -> std::io::Result<()> {
        let mut writer = self.writer.lock().expect("link write mutex poisoned");
        msg.write_to(&mut *writer)
    }

    /// We know the neighbor's bitfield and it has at least one piece we don't.
    fn interest_in_neighbor(&self) -> bool {
        let neighbor = self.neighbor_bitfield.lock().expect("neighbor bitfield mutex poisoned");
        match neighbor.as_ref() {
            Some(bits) => self.ctx.registry.next_needed_from(bits).is_some(),
            None => false,
        }
    }

    fn request_next_needed(&self) -> std::io::Result<()> {
        let neighbor = self.neighbor_bitfield.lock().expect("neighbor bitfield mutex poisoned");
        let Some(bits) = neighbor.as_ref() else {
            return Ok(());
        };
        if let Some(index) = self.ctx.registry.next_needed_from(bits) {
            drop(neighbor);
            self.awaiting_piece.store(true, Ordering::SeqCst);
            self.send(Message::Request(index as u32))?;
        }
        Ok(())
    }

    fn send_interest_update(&self) -> std::io::Result<()> {
        if self.interest_in_neighbor() {
            self.send(Message::Interested)
        } else {
            self.send(Message::NotInterested)
        }
    }

    /// Lazily allocates the neighbor bitfield to all-zeros, e.g. a `have` arriving before any
    /// `bitfield` frame.
    fn ensure_neighbor_bitfield<'a>(
        &self,
        guard: &'a mut Option<Bitfield>,
    ) -> &'a mut Bitfield {
        guard.get_or_insert_with(|| Bitfield::new(self.ctx.num_pieces))
    }

    /// Blocking receive loop: decodes and dispatches frames until EOF, I/O error, decode error, or
    /// process termination. Deregisters from the link set on the way out.
    fn run(self: Arc<Self>, mut reader: TcpStream) {
        loop {
            match Message::read_from(&mut reader, self.ctx.max_frame_len) {
                Ok(msg) => {
                    if let Err(err) = self.handle(msg) {
                        tracing::warn!(peer = self.remote_peer_id, error = %err, "link terminating on handler error");
                        break;
                    }
                }
                Err(err) => {
                    tracing::info!(peer = self.remote_peer_id, error = %err, "link terminating on decode/io error");
                    break;
                }
            }
        }
        self.ctx.links.remove(self.remote_peer_id);
    }

    fn handle(&self, msg: Message) -> Result<(), LinkError> {
        match msg {
            Message::Choke => {
                self.am_choked_by_neighbor.store(true, Ordering::SeqCst);
                self.awaiting_piece.store(false, Ordering::SeqCst);
                self.ctx.log.log(format!(
                    "Peer {} is choked by Peer {}.",
                    self.ctx.local_peer_id, self.remote_peer_id
                ));
            }
            Message::Unchoke => {
                self.am_choked_by_neighbor.store(false, Ordering::SeqCst);
                self.ctx.log.log(format!(
                    "Peer {} is unchoked by Peer {}.",
                    self.ctx.local_peer_id, self.remote_peer_id
                ));
                if !self.awaiting_piece.load(Ordering::SeqCst) {
                    self.request_next_needed()?;
                }
            }
            Message::Interested => {
                self.neighbor_interested_in_me.store(true, Ordering::SeqCst);
                self.ctx.log.log(format!(
                    "Peer {} received the 'interested' message from Peer {}.",
                    self.ctx.local_peer_id, self.remote_peer_id
                ));
            }
            Message::NotInterested => {
                self.neighbor_interested_in_me.store(false, Ordering::SeqCst);
                self.ctx.log.log(format!(
                    "Peer {} received the 'not interested' message from Peer {}.",
                    self.ctx.local_peer_id, self.remote_peer_id
                ));
            }
            Message::Have(index) => {
                let index = index as usize;
                if index >= self.ctx.num_pieces {
                    return Err(LinkError::InvariantViolation(format!(
                        "have({index}) outside 0..{}",
                        self.ctx.num_pieces
                    )));
                }

                {
                    let mut guard = self.neighbor_bitfield.lock().expect("neighbor bitfield mutex poisoned");
                    self.ensure_neighbor_bitfield(&mut guard).set(index, true);
                }
                self.ctx.log.log(format!(
                    "Peer {} received the 'have' message from Peer {} for the piece {index}.",
                    self.ctx.local_peer_id, self.remote_peer_id
                ));

                if !self.ctx.registry.have(index) {
                    self.send(Message::Interested)?;
                    if !self.am_choked_by_neighbor.load(Ordering::SeqCst)
                        && !self.awaiting_piece.load(Ordering::SeqCst)
                    {
                        self.request_next_needed()?;
                    }
                } else if !self.interest_in_neighbor() {
                    self.send(Message::NotInterested)?;
                }
            }
            Message::Bitfield(bytes) => {
                let bits = Bitfield::from_bytes(&bytes, self.ctx.num_pieces);
                *self.neighbor_bitfield.lock().expect("neighbor bitfield mutex poisoned") = Some(bits);

                self.send_interest_update()?;
                if !self.am_choked_by_neighbor.load(Ordering::SeqCst) && self.interest_in_neighbor() {
                    self.request_next_needed()?;
                }
            }
            Message::Request(index) => {
                let index = index as usize;
                if index >= self.ctx.num_pieces {
                    return Err(LinkError::InvariantViolation(format!(
                        "request({index}) outside 0..{}",
                        self.ctx.num_pieces
                    )));
                }
                if self.i_choke_neighbor.load(Ordering::SeqCst) {
                    // Already choked, nothing to do; we already told them so.
                    return Ok(());
                }
                match self.ctx.storage.read_piece(index) {
                    Ok(data) => self.send(Message::Piece { index: index as u32, data })?,
                    Err(err) => {
                        tracing::warn!(peer = self.remote_peer_id, %index, error = %err, "storage read failed, request dropped");
                    }
                }
            }
            Message::Piece { index, data } => {
                let index = index as usize;
                if index >= self.ctx.num_pieces {
                    return Err(LinkError::InvariantViolation(format!(
                        "piece({index}) outside 0..{}",
                        self.ctx.num_pieces
                    )));
                }

                if let Err(err) = self.ctx.storage.write_piece(index, &data) {
                    tracing::warn!(peer = self.remote_peer_id, %index, error = %err, "storage write failed");
                } else {
                    self.ctx.registry.mark_have(index);
                    self.bytes_from_neighbor_this_interval
                        .fetch_add(data.len() as u64, Ordering::SeqCst);

                    let new_count = (0..self.ctx.num_pieces).filter(|&i| self.ctx.registry.have(i)).count();
                    self.ctx.log.log(format!(
                        "Peer {} has downloaded the piece {index} from Peer {}. Now the number of pieces it has is {new_count}.",
                        self.ctx.local_peer_id, self.remote_peer_id
                    ));

                    self.broadcast_have(index);
                }

                self.awaiting_piece.store(false, Ordering::SeqCst);

                if self.ctx.registry.is_complete() {
                    self.broadcast_not_interested();
                } else if !self.am_choked_by_neighbor.load(Ordering::SeqCst) {
                    self.request_next_needed()?;
                }
            }
        }
        Ok(())
    }

    /// Broadcasts `have(index)` to every live link, including this one (harmless).
    fn broadcast_have(&self, index: usize) {
        if self.ctx.registry.is_complete() {
            self.ctx.log.log(format!(
                "Peer {} has downloaded the complete file.",
                self.ctx.local_peer_id
            ));
        }
        for link in self.ctx.links.snapshot() {
            let _ = link.send(Message::Have(index as u32));
        }
    }

    /// Sends `not_interested` on every live link once the local file is complete, not only the
    /// link that delivered the final piece.
    fn broadcast_not_interested(&self) {
        for link in self.ctx.links.snapshot() {
            let _ = link.send(Message::NotInterested);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logging::ActivityLog;
    use crate::piece_registry::PieceRegistry;
    use crate::storage::StorageAdapter;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    struct NullStorage;
    impl StorageAdapter for NullStorage {
        fn read_piece(&self, _index: usize) -> Result<Vec<u8>, crate::error::StorageError> {
            Ok(Vec::new())
        }
        fn write_piece(&self, _index: usize, _data: &[u8]) -> Result<(), crate::error::StorageError> {
            Ok(())
        }
    }

    fn test_ctx(local_peer_id: u32) -> Arc<SwarmContext> {
        Arc::new(SwarmContext {
            local_peer_id,
            registry: Arc::new(PieceRegistry::new(8, false)),
            storage: Arc::new(NullStorage),
            links: Arc::new(crate::peer::LinkSet::new()),
            log: Arc::new(ActivityLog::open(local_peer_id).expect("open test log")),
            num_pieces: 8,
            piece_size: 16,
            max_frame_len: 1 << 16,
            read_timeout: Duration::from_secs(5),
        })
    }

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Builds a `PeerLink` wired to a connected-but-otherwise-idle socket, for tests that only
    /// exercise link-set bookkeeping rather than wire traffic.
    pub(crate) fn dummy_link(remote_peer_id: u32) -> Arc<PeerLink> {
        let (client, _server) = loopback_pair();
        let ctx = test_ctx(9000);
        Arc::new(PeerLink {
            remote_peer_id,
            remote_addr: client.peer_addr().unwrap(),
            direction: Direction::Outbound,
            writer: Mutex::new(client),
            neighbor_bitfield: Mutex::new(None),
            am_choked_by_neighbor: AtomicBool::new(true),
            i_choke_neighbor: AtomicBool::new(true),
            neighbor_interested_in_me: AtomicBool::new(false),
            awaiting_piece: AtomicBool::new(false),
            bytes_from_neighbor_this_interval: AtomicU64::new(0),
            ctx,
        })
    }

    #[test]
    fn set_choked_is_idempotent() {
        let link = dummy_link(1);
        link.set_choked(true); // already true at construction: no frame, no state flip observed
        assert!(link.i_choke_neighbor());
        link.set_choked(false);
        assert!(!link.i_choke_neighbor());
        link.set_choked(false);
        assert!(!link.i_choke_neighbor());
    }

    #[test]
    fn choke_clears_awaiting_piece() {
        let link = dummy_link(1);
        link.awaiting_piece.store(true, Ordering::SeqCst);
        link.handle(Message::Choke).unwrap();
        assert!(!link.awaiting_piece.load(Ordering::SeqCst));
        assert!(link.am_choked_by_neighbor());
    }

    #[test]
    fn have_outside_range_is_an_invariant_violation() {
        let link = dummy_link(1);
        let err = link.handle(Message::Have(999)).unwrap_err();
        assert!(matches!(err, LinkError::InvariantViolation(_)));
    }

    #[test]
    fn request_outside_range_is_an_invariant_violation() {
        let link = dummy_link(1);
        link.i_choke_neighbor.store(false, Ordering::SeqCst);
        let err = link.handle(Message::Request(999)).unwrap_err();
        assert!(matches!(err, LinkError::InvariantViolation(_)));
    }

    #[test]
    fn interest_tracks_bitfield_and_local_registry() {
        let link = dummy_link(1);
        let mut neighbor_bits = Bitfield::new(8);
        neighbor_bits.set(2, true);
        *link.neighbor_bitfield.lock().unwrap() = Some(neighbor_bits);
        assert!(link.interest_in_neighbor());

        link.ctx.registry.mark_have(2);
        assert!(!link.interest_in_neighbor());
    }

    #[test]
    fn bytes_counter_is_read_and_zeroed() {
        let link = dummy_link(1);
        link.bytes_from_neighbor_this_interval.store(42, Ordering::SeqCst);
        assert_eq!(link.take_bytes_this_interval(), 42);
        assert_eq!(link.take_bytes_this_interval(), 0);
    }

    /// Completing the local file on the last `piece` frame must send `not_interested` on every
    /// live link, not only the one that delivered the final piece.
    #[test]
    fn completing_last_piece_broadcasts_not_interested_to_every_link() {
        let link = dummy_link(1);
        for i in 0..7 {
            link.ctx.registry.mark_have(i);
        }

        let (other_client, mut other_server) = loopback_pair();
        other_server.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let other = Arc::new(PeerLink {
            remote_peer_id: 2,
            remote_addr: other_client.peer_addr().unwrap(),
            direction: Direction::Outbound,
            writer: Mutex::new(other_client),
            neighbor_bitfield: Mutex::new(None),
            am_choked_by_neighbor: AtomicBool::new(true),
            i_choke_neighbor: AtomicBool::new(true),
            neighbor_interested_in_me: AtomicBool::new(false),
            awaiting_piece: AtomicBool::new(false),
            bytes_from_neighbor_this_interval: AtomicU64::new(0),
            ctx: link.ctx.clone(),
        });
        link.ctx.links.insert(other.clone());

        link.handle(Message::Piece {
            index: 7,
            data: vec![0u8; 16],
        })
        .unwrap();

        assert!(link.ctx.registry.is_complete());

        let first = Message::read_from(&mut other_server, link.ctx.max_frame_len).unwrap();
        assert_eq!(first, Message::Have(7));
        let second = Message::read_from(&mut other_server, link.ctx.max_frame_len).unwrap();
        assert_eq!(second, Message::NotInterested);
    }
}
