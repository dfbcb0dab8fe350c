use relaychat::protocol::RelayFingerprint;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Fingerprints of chat records this node has already broadcast.
///
/// Unbounded by default: a fingerprint, once seen, is remembered for the life
/// of the node. With a capacity the set becomes a FIFO window of the most
/// recent fingerprints.
pub struct RelayDeduplicator {
    inner: Mutex<Seen>,
    capacity: Option<usize>,
}

#[derive(Default)]
struct Seen {
    set: HashSet<RelayFingerprint>,
    /// Insertion order, only maintained when bounded.
    order: VecDeque<RelayFingerprint>,
}

impl RelayDeduplicator {
    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(Seen::default()),
            capacity: None,
        }
    }

    /// Remember at most `capacity` fingerprints (minimum 1), evicting the oldest.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Seen::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(n) => Self::bounded(n),
            None => Self::unbounded(),
        }
    }

    /// Record `fingerprint`. True only the first time it is seen.
    pub fn should_process(&self, fingerprint: RelayFingerprint) -> bool {
        let mut seen = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.set.contains(&fingerprint) {
            return false;
        }
        if let Some(capacity) = self.capacity {
            if seen.set.len() >= capacity
                && let Some(oldest) = seen.order.pop_front()
            {
                seen.set.remove(&oldest);
            }
            seen.order.push_back(fingerprint.clone());
        }
        seen.set.insert(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
