use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::context::SwarmContext;
use crate::peer::PeerLink;

/// `preferred_ids` and `optimistic_id`, guarded together behind one lock. Both fields are mutated
/// only by the two scheduler threads, but read by `set_choked` callers and by the other scheduler
/// thread.
#[derive(Default)]
struct SchedulerState {
    preferred_ids: HashSet<u32>,
    optimistic_id: Option<u32>,
}

/// Process-wide singleton driving the two periodic tasks that decide upload allocation:
/// preferred-neighbor recomputation every `p` seconds, optimistic-unchoke rotation every `m`
/// seconds. Spawned once from bootstrap; both threads run until process exit.
pub struct ChokeScheduler {
    ctx: Arc<SwarmContext>,
    k: usize,
    state: Mutex<SchedulerState>,
}

impl ChokeScheduler {
    pub fn new(ctx: Arc<SwarmContext>, k: usize) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            k,
            state: Mutex::new(SchedulerState::default()),
        })
    }

    /// Spawns the preferred-neighbor and optimistic-unchoke threads. Detached: nothing ever joins
    /// them, so they run until `std::process::exit` tears the process down.
    pub fn spawn(self: &Arc<Self>, unchoking_interval: Duration, optimistic_unchoking_interval: Duration) {
        let preferred = self.clone();
        std::thread::spawn(move || preferred.run_preferred_loop(unchoking_interval));

        let optimistic = self.clone();
        std::thread::spawn(move || optimistic.run_optimistic_loop(optimistic_unchoking_interval));
    }

    fn run_preferred_loop(self: Arc<Self>, interval: Duration) {
        loop {
            std::thread::sleep(interval);
            // A bad tick gets logged and skipped instead of silently killing the thread.
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick_preferred())).is_err() {
                tracing::error!("preferred-neighbor tick panicked; continuing");
            }
        }
    }

    fn run_optimistic_loop(self: Arc<Self>, interval: Duration) {
        loop {
            std::thread::sleep(interval);
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick_optimistic())).is_err() {
                tracing::error!("optimistic-unchoke tick panicked; continuing");
            }
        }
    }

    /// One preferred-neighbor recomputation.
    fn tick_preferred(&self) {
        let links = self.ctx.links.snapshot();

        // Drain every live link's counter this interval, even links we're not interested in.
        let drained: Vec<(u32, bool, u64)> = links
            .iter()
            .map(|link| {
                (
                    link.remote_peer_id(),
                    link.neighbor_interested_in_me(),
                    link.take_bytes_this_interval(),
                )
            })
            .collect();

        let mut candidates: Vec<(u32, u64)> = drained
            .into_iter()
            .filter(|(_, interested, _)| *interested)
            .map(|(id, _, bytes)| (id, bytes))
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);

        if !self.ctx.registry.is_complete() {
            // Shuffle first, then a stable sort by bytes descending: ties keep the shuffled order.
            candidates.sort_by(|a, b| b.1.cmp(&a.1));
        }
        // Already seeding: the shuffle alone is the selection, everyone's equally "fast".

        let chosen: HashSet<u32> = candidates.into_iter().take(self.k).map(|(id, _)| id).collect();

        let mut state = self.state.lock().expect("scheduler state mutex poisoned");
        if state.preferred_ids != chosen {
            let mut ids: Vec<u32> = chosen.iter().copied().collect();
            ids.sort_unstable();
            self.ctx.log.log(format!(
                "Peer {} has the preferred neighbors {}.",
                self.ctx.local_peer_id,
                format_ids(&ids)
            ));
        }
        state.preferred_ids = chosen.clone();
        let optimistic_id = state.optimistic_id;
        drop(state);

        // Every live link, not just the candidates, gets its choke state reconciled.
        for link in &links {
            let unchoked = chosen.contains(&link.remote_peer_id()) || optimistic_id == Some(link.remote_peer_id());
            link.set_choked(!unchoked);
        }
    }

    /// One optimistic-unchoke rotation.
    fn tick_optimistic(&self) {
        let links = self.ctx.links.snapshot();
        let candidates: Vec<Arc<PeerLink>> = links
            .iter()
            .filter(|link| link.neighbor_interested_in_me() && link.i_choke_neighbor())
            .cloned()
            .collect();

        let mut state = self.state.lock().expect("scheduler state mutex poisoned");
        let previous_id = state.optimistic_id;

        let Some(chosen) = candidates.choose(&mut rand::thread_rng()) else {
            state.optimistic_id = None;
            return;
        };

        let chosen = chosen.clone();
        let changed = previous_id != Some(chosen.remote_peer_id());
        state.optimistic_id = Some(chosen.remote_peer_id());
        let preferred_ids = state.preferred_ids.clone();
        drop(state);

        if changed {
            self.ctx.log.log(format!(
                "Peer {} has the optimistically unchoked neighbor {}.",
                self.ctx.local_peer_id,
                chosen.remote_peer_id()
            ));
        }
        chosen.set_choked(false);

        if let Some(prev_id) = previous_id {
            if prev_id != chosen.remote_peer_id() && !preferred_ids.contains(&prev_id) {
                if let Some(prev_link) = links.iter().find(|link| link.remote_peer_id() == prev_id) {
                    prev_link.set_choked(true);
                }
            }
        }
    }
}

fn format_ids(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::ActivityLog;
    use crate::peer::LinkSet;
    use crate::piece_registry::PieceRegistry;
    use crate::storage::StorageAdapter;

    struct NullStorage;
    impl StorageAdapter for NullStorage {
        fn read_piece(&self, _index: usize) -> Result<Vec<u8>, crate::error::StorageError> {
            Ok(Vec::new())
        }
        fn write_piece(&self, _index: usize, _data: &[u8]) -> Result<(), crate::error::StorageError> {
            Ok(())
        }
    }

    fn test_ctx() -> Arc<SwarmContext> {
        Arc::new(SwarmContext {
            local_peer_id: 9000,
            registry: Arc::new(PieceRegistry::new(8, false)),
            storage: Arc::new(NullStorage),
            links: Arc::new(LinkSet::new()),
            log: Arc::new(ActivityLog::open(9000).expect("open test log")),
            num_pieces: 8,
            piece_size: 16,
            max_frame_len: 1 << 16,
            read_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn preferred_tick_with_no_links_clears_preferred_set() {
        let ctx = test_ctx();
        let scheduler = ChokeScheduler::new(ctx, 1);
        scheduler.tick_preferred();
        assert!(scheduler.state.lock().unwrap().preferred_ids.is_empty());
    }

    #[test]
    fn optimistic_tick_with_no_candidates_clears_optimistic() {
        let ctx = test_ctx();
        let scheduler = ChokeScheduler::new(ctx, 1);
        scheduler.state.lock().unwrap().optimistic_id = Some(42);
        scheduler.tick_optimistic();
        assert_eq!(scheduler.state.lock().unwrap().optimistic_id, None);
    }

    #[test]
    fn rate_fairness_prefers_higher_byte_count_when_not_seeding() {
        use crate::peer::link::tests::dummy_link;

        let ctx = test_ctx();
        let scheduler = ChokeScheduler::new(ctx.clone(), 1);

        let a = dummy_link(1);
        let b = dummy_link(2);
        a.mark_interested_for_test();
        b.mark_interested_for_test();
        a.add_bytes_for_test(1000);
        b.add_bytes_for_test(10);

        ctx.links.insert(a.clone());
        ctx.links.insert(b.clone());

        scheduler.tick_preferred();

        let state = scheduler.state.lock().unwrap();
        assert!(state.preferred_ids.contains(&1));
        assert!(!state.preferred_ids.contains(&2));
    }
}
