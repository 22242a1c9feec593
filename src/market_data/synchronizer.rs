// Snapshot + sequenced-diff book synchronization.
//
// The synchronizer never merges or reorders on its own: a diff is applied only
// when its sequence is exactly `last_applied + 1`. Anything older is stale, anything
// newer is a gap and the book drops back to `Unsynced` until a fresh snapshot arrives.
// Diffs seen while unsynced wait in a bounded queue and are replayed in sequence
// order once the snapshot lands.

use std::collections::VecDeque;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::engine::types::PriceLevel;
use crate::market_data::external_book::{ExternalBook, Side};
use crate::market_data::normaliser::KeyedLevel;
use crate::market_data::retry::{Clock, SystemClock};
use crate::market_data::tick::{BookTick, FeedSource};

pub const DEFAULT_MAX_PENDING: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub sequence: u64,
    pub bids: Vec<KeyedLevel>,
    pub asks: Vec<KeyedLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookDiff {
    pub sequence: u64,
    pub bids: Vec<KeyedLevel>,
    pub asks: Vec<KeyedLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Synced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// Applied in order. `tick` is `None` if the diff emptied a side.
    Applied { tick: Option<BookTick> },
    /// Held until the next snapshot.
    Queued,
    /// At or below the last applied sequence; dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotApplied {
    pub tick: Option<BookTick>,
    pub replayed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("sequence number must be positive")]
    InvalidSequence,
    #[error("snapshot {sequence} has an empty {side} side")]
    EmptySide { sequence: u64, side: Side },
    #[error("sequence gap: expected {expected}, received {received}")]
    Gap { expected: u64, received: u64 },
}

pub struct BookSynchronizer {
    book: ExternalBook,
    last_applied: u64,
    ready: bool,
    pending: VecDeque<BookDiff>,
    max_pending: usize,
    clock: Arc<dyn Clock>,
}

impl BookSynchronizer {
    pub fn new(depth: usize) -> Self {
        Self::with_clock(depth, DEFAULT_MAX_PENDING, Arc::new(SystemClock))
    }

    pub fn with_clock(depth: usize, max_pending: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            book: ExternalBook::new(depth),
            last_applied: 0,
            ready: false,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            clock,
        }
    }

    pub fn state(&self) -> SyncState {
        if self.ready {
            SyncState::Synced
        } else {
            SyncState::Unsynced
        }
    }

    pub fn is_synced(&self) -> bool {
        self.ready
    }

    pub fn last_applied_sequence(&self) -> u64 {
        self.last_applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn bids(&self) -> &[PriceLevel] {
        self.book.bids.view()
    }

    pub fn asks(&self) -> &[PriceLevel] {
        self.book.asks.view()
    }

    /// Current top-of-book, if synced and both sides have levels.
    pub fn top_of_book(&self) -> Option<BookTick> {
        if !self.ready {
            return None;
        }
        BookTick::from_levels(self.bids(), self.asks(), self.clock.now_ms(), FeedSource::Ws)
    }

    /// Replace the book wholesale, then replay queued diffs in sequence order.
    ///
    /// On `Err(Gap)` the snapshot is too old to bridge the queue: the book is
    /// unsynced again and a newer snapshot is needed.
    #[instrument(level = "debug", skip_all, fields(nonce = snapshot.sequence))]
    pub fn apply_snapshot(&mut self, snapshot: BookSnapshot) -> Result<SnapshotApplied, SyncError> {
        if snapshot.sequence == 0 {
            return Err(SyncError::InvalidSequence);
        }
        for (side, levels) in [(Side::Bid, &snapshot.bids), (Side::Ask, &snapshot.asks)] {
            if !levels.iter().any(|l| l.size > 0.0 && l.size.is_finite()) {
                return Err(SyncError::EmptySide { sequence: snapshot.sequence, side });
            }
        }

        self.book.apply_snapshot(&snapshot.bids, &snapshot.asks);
        self.last_applied = snapshot.sequence;
        self.ready = true;

        let mut queued = self.pending.drain(..).sorted_by_key(|d| d.sequence);
        let mut replayed = 0;
        while let Some(diff) = queued.next() {
            if diff.sequence <= self.last_applied {
                continue;
            }
            if diff.sequence != self.last_applied + 1 {
                let err = SyncError::Gap { expected: self.last_applied + 1, received: diff.sequence };
                warn!(error = %err, "queued diffs do not follow snapshot");
                self.invalidate();
                self.pending.push_back(diff);
                self.pending.extend(queued.by_ref());
                metrics::counter!("spreadx_sequence_gaps_total").increment(1);
                return Err(err);
            }
            self.book.apply_diff(&diff.bids, &diff.asks);
            self.last_applied = diff.sequence;
            replayed += 1;
        }

        debug!(last_applied = self.last_applied, replayed, "snapshot applied");
        Ok(SnapshotApplied { tick: self.top_of_book(), replayed })
    }

    #[instrument(level = "trace", skip_all, fields(nonce = diff.sequence))]
    pub fn apply_diff(&mut self, diff: BookDiff) -> Result<DiffOutcome, SyncError> {
        if diff.sequence == 0 {
            return Err(SyncError::InvalidSequence);
        }
        if !self.ready {
            self.enqueue(diff);
            return Ok(DiffOutcome::Queued);
        }
        if diff.sequence <= self.last_applied {
            trace!(last_applied = self.last_applied, "discarding stale diff");
            metrics::counter!("spreadx_stale_diffs_total").increment(1);
            return Ok(DiffOutcome::Stale);
        }
        if diff.sequence != self.last_applied + 1 {
            let err = SyncError::Gap { expected: self.last_applied + 1, received: diff.sequence };
            warn!(error = %err, "book out of sync, resync required");
            metrics::counter!("spreadx_sequence_gaps_total").increment(1);
            self.invalidate();
            self.enqueue(diff);
            return Err(err);
        }

        self.book.apply_diff(&diff.bids, &diff.asks);
        self.last_applied = diff.sequence;
        metrics::counter!("spreadx_diffs_applied_total").increment(1);
        Ok(DiffOutcome::Applied { tick: self.top_of_book() })
    }

    /// Forget everything, including queued diffs. Used on transport loss.
    pub fn reset(&mut self) {
        self.invalidate();
        self.pending.clear();
    }

    fn invalidate(&mut self) {
        self.ready = false;
        self.last_applied = 0;
        self.book.clear();
    }

    fn enqueue(&mut self, diff: BookDiff) {
        if self.pending.len() >= self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                debug!(nonce = dropped.sequence, "pending queue full, dropping oldest diff");
            }
        }
        self.pending.push_back(diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::normaliser::Normaliser;
    use proptest::prelude::*;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    fn lvl(price: f64, size: f64) -> KeyedLevel {
        let key = Normaliser::default().key_from_f64(price).unwrap();
        KeyedLevel { key, price, size }
    }

    fn sync() -> BookSynchronizer {
        BookSynchronizer::with_clock(10, 8, Arc::new(FixedClock(1_000)))
    }

    fn snapshot(sequence: u64) -> BookSnapshot {
        BookSnapshot {
            sequence,
            bids: vec![lvl(10.0, 1.0), lvl(9.9, 2.0)],
            asks: vec![lvl(10.5, 1.0), lvl(10.6, 2.0)],
        }
    }

    fn diff(sequence: u64, bids: Vec<KeyedLevel>, asks: Vec<KeyedLevel>) -> BookDiff {
        BookDiff { sequence, bids, asks }
    }

    #[test]
    fn test_snapshot_then_diffs() {
        let mut s = sync();
        let applied = s.apply_snapshot(snapshot(100)).unwrap();
        let tick = applied.tick.unwrap();
        assert_eq!((tick.bid, tick.ask), (10.0, 10.5));
        assert_eq!(tick.timestamp_ms, 1_000);
        assert_eq!(tick.source, FeedSource::Ws);

        let outcome = s.apply_diff(diff(101, vec![lvl(10.1, 1.0)], vec![])).unwrap();
        match outcome {
            DiffOutcome::Applied { tick: Some(tick) } => assert_eq!(tick.bid, 10.1),
            other => panic!("unexpected {other:?}"),
        }
        s.apply_diff(diff(102, vec![], vec![lvl(10.5, 0.0)])).unwrap();
        assert_eq!(s.last_applied_sequence(), 102);
        assert_eq!(s.asks()[0].price, 10.6);
    }

    #[test]
    fn test_duplicate_diff_is_discarded() {
        let mut s = sync();
        s.apply_snapshot(snapshot(49)).unwrap();
        let d = diff(50, vec![lvl(10.2, 1.0)], vec![]);
        assert!(matches!(s.apply_diff(d.clone()).unwrap(), DiffOutcome::Applied { .. }));
        assert_eq!(s.last_applied_sequence(), 50);
        let bids_before = s.bids().to_vec();
        assert_eq!(s.apply_diff(d).unwrap(), DiffOutcome::Stale);
        assert_eq!(s.last_applied_sequence(), 50);
        assert_eq!(s.bids(), bids_before.as_slice());
        assert_eq!(s.state(), SyncState::Synced);
    }

    #[test]
    fn test_gap_unsyncs_without_applying() {
        let mut s = sync();
        s.apply_snapshot(snapshot(100)).unwrap();
        let err = s.apply_diff(diff(102, vec![lvl(10.3, 1.0)], vec![])).unwrap_err();
        assert_eq!(err, SyncError::Gap { expected: 101, received: 102 });
        assert_eq!(s.state(), SyncState::Unsynced);
        assert!(s.bids().is_empty());
        assert!(s.top_of_book().is_none());
        assert_eq!(s.pending_len(), 1);

        // A snapshot at 101 bridges the retained diff
        let applied = s.apply_snapshot(snapshot(101)).unwrap();
        assert_eq!(applied.replayed, 1);
        assert_eq!(s.last_applied_sequence(), 102);
        assert_eq!(s.bids()[0].price, 10.3);
    }

    #[test]
    fn test_queued_diffs_replay_in_order() {
        let mut s = sync();
        assert_eq!(s.apply_diff(diff(102, vec![lvl(10.2, 1.0)], vec![])).unwrap(), DiffOutcome::Queued);
        assert_eq!(s.apply_diff(diff(99, vec![lvl(1.0, 1.0)], vec![])).unwrap(), DiffOutcome::Queued);
        assert_eq!(s.apply_diff(diff(101, vec![lvl(10.2, 5.0)], vec![])).unwrap(), DiffOutcome::Queued);
        assert_eq!(s.state(), SyncState::Unsynced);

        let applied = s.apply_snapshot(snapshot(100)).unwrap();
        assert_eq!(applied.replayed, 2);
        assert_eq!(s.last_applied_sequence(), 102);
        // 102 overwrote 101's size; the stale 99 never touched the book
        assert_eq!(s.bids()[0], PriceLevel::new(10.2, 1.0));
        assert!(s.bids().iter().all(|l| l.price != 1.0));
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn test_replay_gap_requires_newer_snapshot() {
        let mut s = sync();
        s.apply_diff(diff(105, vec![lvl(10.2, 1.0)], vec![])).unwrap();
        let err = s.apply_snapshot(snapshot(100)).unwrap_err();
        assert_eq!(err, SyncError::Gap { expected: 101, received: 105 });
        assert_eq!(s.state(), SyncState::Unsynced);
        assert_eq!(s.pending_len(), 1);

        s.apply_snapshot(snapshot(104)).unwrap();
        assert_eq!(s.last_applied_sequence(), 105);
    }

    #[test]
    fn test_malformed_snapshots_are_rejected() {
        let mut s = sync();
        assert_eq!(s.apply_snapshot(snapshot(0)).unwrap_err(), SyncError::InvalidSequence);
        let empty_asks = BookSnapshot { asks: vec![lvl(10.5, 0.0)], ..snapshot(7) };
        assert_eq!(
            s.apply_snapshot(empty_asks).unwrap_err(),
            SyncError::EmptySide { sequence: 7, side: Side::Ask }
        );
        assert_eq!(s.state(), SyncState::Unsynced);
        assert_eq!(s.apply_diff(diff(0, vec![], vec![])).unwrap_err(), SyncError::InvalidSequence);
    }

    #[test]
    fn test_pending_queue_is_bounded() {
        let mut s = sync();
        for seq in 1..=20 {
            s.apply_diff(diff(seq, vec![], vec![])).unwrap();
        }
        assert_eq!(s.pending_len(), 8);
        s.apply_snapshot(snapshot(12)).unwrap();
        assert_eq!(s.last_applied_sequence(), 20);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut s = sync();
        s.apply_snapshot(snapshot(10)).unwrap();
        s.apply_diff(diff(12, vec![], vec![])).unwrap_err();
        s.reset();
        assert_eq!(s.state(), SyncState::Unsynced);
        assert_eq!(s.pending_len(), 0);
        assert_eq!(s.last_applied_sequence(), 0);
    }

    #[test]
    fn test_diff_emptying_a_side_has_no_tick() {
        let mut s = sync();
        s.apply_snapshot(BookSnapshot { sequence: 1, bids: vec![lvl(10.0, 1.0)], asks: vec![lvl(10.5, 1.0)] })
            .unwrap();
        let outcome = s.apply_diff(diff(2, vec![lvl(10.0, 0.0)], vec![])).unwrap();
        assert_eq!(outcome, DiffOutcome::Applied { tick: None });
        assert!(s.is_synced());
    }

    fn arb_update() -> impl Strategy<Value = (f64, f64)> {
        ((900u32..1100).prop_map(|p| p as f64 / 100.0), prop_oneof![Just(0.0), 0.1f64..50.0])
    }

    proptest! {
        #[test]
        fn views_stay_ordered(updates in prop::collection::vec(
            (prop::collection::vec(arb_update(), 0..6), prop::collection::vec(arb_update(), 0..6)),
            1..40,
        )) {
            let mut s = BookSynchronizer::with_clock(5, 64, Arc::new(FixedClock(0)));
            s.apply_snapshot(snapshot(1)).unwrap();
            let count = updates.len() as u64;
            for (i, (bids, asks)) in updates.into_iter().enumerate() {
                let bids = bids.into_iter().map(|(p, q)| lvl(p, q)).collect();
                let asks = asks.into_iter().map(|(p, q)| lvl(p, q)).collect();
                s.apply_diff(diff(2 + i as u64, bids, asks)).unwrap();
            }
            prop_assert_eq!(s.last_applied_sequence(), 1 + count);
            prop_assert!(s.bids().len() <= 5 && s.asks().len() <= 5);
            prop_assert!(s.bids().windows(2).all(|w| w[0].price > w[1].price));
            prop_assert!(s.asks().windows(2).all(|w| w[0].price < w[1].price));
            prop_assert!(s.bids().iter().chain(s.asks()).all(|l| l.size > 0.0));
        }
    }
}
