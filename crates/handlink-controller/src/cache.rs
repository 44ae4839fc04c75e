//! [`StateCache`] – the single most recently accepted hand state.
//!
//! Incoming notifications pass two checks before they replace the cache:
//!
//! 1. **Ordering** – a stamp strictly earlier than the cached one means the
//!    feed can no longer be trusted; the notification is dropped and the
//!    cache is cleared.
//! 2. **Shape** – the number of positions must equal the number of
//!    controlled DOFs; otherwise the notification is dropped and the cache
//!    is left as it was.
//!
//! Equal stamps are accepted.

use std::sync::Arc;

use handlink_types::HandState;

/// What [`StateCache::apply`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// The notification replaced the cache.
    Accepted,
    /// The notification was older than the cache; the cache was cleared.
    OutOfOrder,
    /// The notification had the wrong number of positions; the cache is
    /// unchanged.
    WrongLength { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Default)]
pub struct StateCache {
    current: Option<Arc<HandState>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `incoming` to the cache, expecting `dof_count` positions.
    pub fn apply(&mut self, incoming: Arc<HandState>, dof_count: usize) -> CacheUpdate {
        if let Some(current) = &self.current
            && incoming.stamp < current.stamp
        {
            self.current = None;
            return CacheUpdate::OutOfOrder;
        }
        if incoming.positions.len() != dof_count {
            return CacheUpdate::WrongLength {
                expected: dof_count,
                actual: incoming.positions.len(),
            };
        }
        self.current = Some(incoming);
        CacheUpdate::Accepted
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn get(&self) -> Option<&Arc<HandState>> {
        self.current.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.current.is_some()
    }

    /// `true` when nothing is cached or the cached state reports done.
    ///
    /// With no feedback at all the hand counts as done, so a host waiting on
    /// it cannot stall forever.
    pub fn is_done(&self) -> bool {
        self.current.as_ref().is_none_or(|state| state.state.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use handlink_types::HandStatus;

    fn state(secs: i64, positions: &[f64], status: HandStatus) -> Arc<HandState> {
        Arc::new(HandState {
            stamp: Utc.timestamp_opt(secs, 0).unwrap(),
            positions: positions.to_vec(),
            state: status,
        })
    }

    #[test]
    fn increasing_sequence_keeps_the_last() {
        let mut cache = StateCache::new();
        let last = state(3, &[0.3; 4], HandStatus::Done);
        for s in [
            state(1, &[0.1; 4], HandStatus::Moving),
            state(2, &[0.2; 4], HandStatus::Moving),
            Arc::clone(&last),
        ] {
            assert_eq!(cache.apply(s, 4), CacheUpdate::Accepted);
        }
        assert_eq!(cache.get(), Some(&last));
    }

    #[test]
    fn earlier_stamp_clears_cache() {
        let mut cache = StateCache::new();
        cache.apply(state(10, &[0.1; 4], HandStatus::Moving), 4);

        let update = cache.apply(state(5, &[0.2; 4], HandStatus::Moving), 4);
        assert_eq!(update, CacheUpdate::OutOfOrder);
        assert!(!cache.is_present());
    }

    #[test]
    fn earlier_stamp_clears_even_with_wrong_length() {
        let mut cache = StateCache::new();
        cache.apply(state(10, &[0.1; 4], HandStatus::Moving), 4);

        let update = cache.apply(state(5, &[0.2; 2], HandStatus::Moving), 4);
        assert_eq!(update, CacheUpdate::OutOfOrder);
        assert!(!cache.is_present());
    }

    #[test]
    fn equal_stamp_is_accepted() {
        let mut cache = StateCache::new();
        cache.apply(state(10, &[0.1; 4], HandStatus::Moving), 4);
        let update = cache.apply(state(10, &[0.2; 4], HandStatus::Done), 4);
        assert_eq!(update, CacheUpdate::Accepted);
        assert_eq!(cache.get().map(|s| s.positions.clone()), Some(vec![0.2; 4]));
    }

    #[test]
    fn wrong_length_leaves_cache_unchanged() {
        let mut cache = StateCache::new();
        let kept = state(1, &[0.1; 4], HandStatus::Moving);
        cache.apply(Arc::clone(&kept), 4);

        let update = cache.apply(state(2, &[0.2; 3], HandStatus::Done), 4);
        assert_eq!(
            update,
            CacheUpdate::WrongLength {
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(cache.get(), Some(&kept));
    }

    #[test]
    fn wrong_length_on_empty_cache_stays_empty() {
        let mut cache = StateCache::new();
        cache.apply(state(1, &[0.1; 5], HandStatus::Done), 4);
        assert!(!cache.is_present());
    }

    #[test]
    fn is_done_truth_table() {
        let mut cache = StateCache::new();
        assert!(cache.is_done(), "empty cache counts as done");

        cache.apply(state(1, &[0.0; 4], HandStatus::Moving), 4);
        assert!(!cache.is_done());

        cache.apply(state(2, &[0.0; 4], HandStatus::Done), 4);
        assert!(cache.is_done());

        cache.apply(state(3, &[0.0; 4], HandStatus::Stalled), 4);
        assert!(!cache.is_done());

        cache.clear();
        assert!(cache.is_done());
    }
}
