use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use super::link::PeerLink;

/// Process-wide set of all live `PeerLink`s, keyed by remote peer id. Insert on construction,
/// remove on termination. `crossbeam_skiplist::SkipMap` gives concurrent insert/remove plus an
/// `.iter()` that is safe to run while other threads mutate the map, which is what the scheduler
/// needs for snapshotting live links while link churn continues.
#[derive(Default)]
pub struct LinkSet {
    links: SkipMap<u32, Arc<PeerLink>>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, link: Arc<PeerLink>) {
        self.links.insert(link.remote_peer_id(), link);
    }

    pub fn remove(&self, remote_peer_id: u32) {
        self.links.remove(&remote_peer_id);
    }

    /// A point-in-time snapshot, safe to iterate while other threads insert/remove concurrently.
    pub fn snapshot(&self) -> Vec<Arc<PeerLink>> {
        self.links.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::link::tests::dummy_link;

    #[test]
    fn insert_remove_and_snapshot() {
        let set = LinkSet::new();
        assert!(set.is_empty());

        let a = dummy_link(1);
        let b = dummy_link(2);
        set.insert(a.clone());
        set.insert(b.clone());
        assert_eq!(set.len(), 2);

        let snap = set.snapshot();
        assert_eq!(snap.len(), 2);

        set.remove(1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].remote_peer_id(), 2);
    }
}
