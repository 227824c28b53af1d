use std::sync::Arc;
use std::time::Duration;

use crate::context::SwarmContext;

/// Background task that polls for swarm-wide completion: once the local registry is complete and
/// every live link reports its neighbor is also complete, the process exits. Remote completeness
/// is read straight off `PeerLink::neighbor_is_complete`, kept live by every `have`/`bitfield`
/// frame the link has processed.
pub fn spawn(ctx: Arc<SwarmContext>, poll_interval: Duration) {
    std::thread::spawn(move || loop {
        std::thread::sleep(poll_interval);
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| tick(&ctx))).is_err() {
            tracing::error!("completion watcher tick panicked; continuing");
        }
    });
}

fn tick(ctx: &Arc<SwarmContext>) {
    if !ctx.registry.is_complete() {
        return;
    }

    let links = ctx.links.snapshot();
    if links.is_empty() || !links.iter().all(|link| link.neighbor_is_complete()) {
        return;
    }

    ctx.log.log(format!(
        "Peer {} has confirmed every peer in the swarm has the complete file.",
        ctx.local_peer_id
    ));
    std::process::exit(0);
}
