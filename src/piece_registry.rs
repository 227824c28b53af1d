use std::sync::Mutex;

use crate::bitfield::Bitfield;

/// Thread-safe wrapper over the local bitfield. Every operation is serialized under a single
/// mutex; `markHave`/`snapshot` are linearizable with respect to each other.
pub struct PieceRegistry {
    bits: Mutex<Bitfield>,
}

impl PieceRegistry {
    pub fn new(num_pieces: usize, starts_with_full_file: bool) -> Self {
        let bits = if starts_with_full_file {
            Bitfield::all_ones(num_pieces)
        } else {
            Bitfield::new(num_pieces)
        };
        Self {
            bits: Mutex::new(bits),
        }
    }

    /// Sets bit `index`. Idempotent.
    pub fn mark_have(&self, index: usize) {
        self.bits.lock().expect("piece registry mutex poisoned").set(index, true);
    }

    pub fn have(&self, index: usize) -> bool {
        self.bits.lock().expect("piece registry mutex poisoned").get(index)
    }

    /// Independent copy, safe to ship on the wire.
    pub fn snapshot(&self) -> Bitfield {
        self.bits.lock().expect("piece registry mutex poisoned").clone()
    }

    pub fn next_needed_from(&self, neighbor_bits: &Bitfield) -> Option<usize> {
        self.bits
            .lock()
            .expect("piece registry mutex poisoned")
            .next_needed_from(neighbor_bits)
    }

    pub fn is_complete(&self) -> bool {
        self.bits.lock().expect("piece registry mutex poisoned").is_complete()
    }

    /// Predicate used by the completion watcher to judge a neighbor's (derived) bitfield.
    pub fn bitfield_is_complete(bits: &Bitfield) -> bool {
        bits.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_by_default() {
        let reg = PieceRegistry::new(4, false);
        assert!(!reg.is_complete());
        for i in 0..4 {
            assert!(!reg.have(i));
        }
    }

    #[test]
    fn starts_full_when_configured() {
        let reg = PieceRegistry::new(4, true);
        assert!(reg.is_complete());
    }

    #[test]
    fn mark_have_is_idempotent_and_eventually_complete() {
        let reg = PieceRegistry::new(3, false);
        reg.mark_have(0);
        reg.mark_have(0);
        reg.mark_have(1);
        reg.mark_have(2);
        assert!(reg.is_complete());
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let reg = PieceRegistry::new(2, false);
        reg.mark_have(0);
        let snap = reg.snapshot();
        reg.mark_have(1);
        assert!(snap.get(0));
        assert!(!snap.get(1));
    }

    #[test]
    fn next_needed_from_reflects_local_and_neighbor_state() {
        let reg = PieceRegistry::new(3, false);
        let mut neighbor = Bitfield::new(3);
        neighbor.set(1, true);
        assert_eq!(reg.next_needed_from(&neighbor), Some(1));
        reg.mark_have(1);
        assert_eq!(reg.next_needed_from(&neighbor), None);
    }
}
