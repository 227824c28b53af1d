use std::sync::Arc;
use std::time::Duration;

use crate::logging::ActivityLog;
use crate::peer::LinkSet;
use crate::piece_registry::PieceRegistry;
use crate::storage::StorageAdapter;

/// Shared services every `PeerLink` and scheduler task needs a handle to. Passed in explicitly at
/// construction time rather than reached for through a process-global static, so link and
/// scheduler lifetimes stay independently reasoned-about.
pub struct SwarmContext {
    pub local_peer_id: u32,
    pub registry: Arc<PieceRegistry>,
    pub storage: Arc<dyn StorageAdapter>,
    pub links: Arc<LinkSet>,
    pub log: Arc<ActivityLog>,
    pub num_pieces: usize,
    pub piece_size: u32,
    pub max_frame_len: u32,
    pub read_timeout: Duration,
}
