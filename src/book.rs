//! Incremental per-instrument L2 order book: snapshot/delta application,
//! sequence continuity tracking, and depth materialization.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Wraps a price so `BTreeMap` iterates bids highest-first without a
/// re-sort after every mutation (the source re-sorts its `OrderedDict`
/// from scratch on every snapshot/update; a `BTreeMap` keeps the
/// invariant for free).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descending(Decimal);

impl PartialOrd for Descending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Descending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.0.cmp(&self.0)
    }
}

pub struct OrderBook {
    pub inst_id: String,
    pub max_depth: usize,
    bids: BTreeMap<Descending, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    pub last_ts_event: i64,
    pub last_checksum: i64,
    pub seq_id: Option<u64>,
    pub prev_seq_id: Option<u64>,
    valid: bool,
}

impl OrderBook {
    pub fn new(inst_id: impl Into<String>, max_depth: usize) -> Self {
        OrderBook {
            inst_id: inst_id.into(),
            max_depth,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_ts_event: 0,
            last_checksum: 0,
            seq_id: None,
            prev_seq_id: None,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Replaces the current book state. Levels with size <= 0 are
    /// dropped (a snapshot never carries "remove" entries).
    pub fn apply_snapshot(
        &mut self,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
        ts_event: i64,
        checksum: i64,
        seq_id: Option<u64>,
        prev_seq_id: Option<u64>,
    ) {
        self.bids.clear();
        self.asks.clear();
        for &(price, size) in bids {
            if size > Decimal::ZERO {
                self.bids.insert(Descending(price), size);
            }
        }
        for &(price, size) in asks {
            if size > Decimal::ZERO {
                self.asks.insert(price, size);
            }
        }
        self.last_ts_event = ts_event;
        self.last_checksum = checksum;
        self.seq_id = seq_id;
        self.prev_seq_id = prev_seq_id;
        self.valid = true;
    }

    /// Upserts nonzero-size levels, removes zero-size levels. Returns
    /// `true` if the update was sequence-continuous with the prior state
    /// (a discontinuity still gets applied — the caller decides what to
    /// do about it, e.g. force a resync).
    pub fn apply_delta(
        &mut self,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
        ts_event: i64,
        checksum: i64,
        seq_id: Option<u64>,
        prev_seq_id: Option<u64>,
    ) -> bool {
        let mut continuous = true;
        if let (Some(expected), Some(got)) = (self.seq_id, prev_seq_id) {
            if expected != got {
                continuous = false;
            }
        }

        for &(price, size) in bids {
            if size > Decimal::ZERO {
                self.bids.insert(Descending(price), size);
            } else {
                self.bids.remove(&Descending(price));
            }
        }
        for &(price, size) in asks {
            if size > Decimal::ZERO {
                self.asks.insert(price, size);
            } else {
                self.asks.remove(&price);
            }
        }

        self.last_ts_event = ts_event;
        self.last_checksum = checksum;
        if let Some(s) = seq_id {
            self.seq_id = Some(s);
        }
        if let Some(p) = prev_seq_id {
            self.prev_seq_id = Some(p);
        }
        continuous
    }

    /// CRC32-over-top-levels checksum verification is not implemented;
    /// the source this was distilled from never verified it either.
    /// TODO: implement OKX's published checksum algorithm over the top
    /// 25 bid/ask levels.
    pub fn verify_checksum(&self) -> bool {
        true
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next().map(|(p, s)| (p.0, *s))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(p, s)| (*p, *s))
    }

    /// Top `limit` (or `max_depth` if `None`) levels per side, bids
    /// highest-first, asks lowest-first.
    pub fn materialize(
        &self,
        limit: Option<usize>,
    ) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        if !self.valid {
            return (Vec::new(), Vec::new());
        }
        let limit = limit.unwrap_or(self.max_depth);
        let bids = self.bids.iter().take(limit).map(|(p, s)| (p.0, *s)).collect();
        let asks = self.asks.iter().take(limit).map(|(p, s)| (*p, *s)).collect();
        (bids, asks)
    }

    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.valid = false;
        self.last_ts_event = 0;
        self.last_checksum = 0;
        self.seq_id = None;
        self.prev_seq_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn snapshot_sorts_bids_desc_asks_asc() {
        let mut book = OrderBook::new("BTC-USDT-SWAP", 50);
        book.apply_snapshot(
            &[(d("100"), d("1")), (d("102"), d("1")), (d("101"), d("1"))],
            &[(d("105"), d("1")), (d("103"), d("1"))],
            1000,
            0,
            Some(1),
            None,
        );
        let (bids, asks) = book.materialize(None);
        assert_eq!(bids, vec![(d("102"), d("1")), (d("101"), d("1")), (d("100"), d("1"))]);
        assert_eq!(asks, vec![(d("103"), d("1")), (d("105"), d("1"))]);
    }

    #[test]
    fn snapshot_drops_zero_size_levels() {
        let mut book = OrderBook::new("X", 50);
        book.apply_snapshot(&[(d("1"), d("0"))], &[], 1, 0, None, None);
        assert!(book.materialize(None).0.is_empty());
    }

    #[test]
    fn delta_upserts_and_removes() {
        let mut book = OrderBook::new("X", 50);
        book.apply_snapshot(&[(d("100"), d("1"))], &[], 1, 0, Some(1), None);
        book.apply_delta(&[(d("100"), d("0")), (d("99"), d("2"))], &[], 2, 0, Some(2), Some(1));
        let (bids, _) = book.materialize(None);
        assert_eq!(bids, vec![(d("99"), d("2"))]);
    }

    #[test]
    fn delta_sequence_gap_still_applies_but_flags_discontinuous() {
        let mut book = OrderBook::new("X", 50);
        book.apply_snapshot(&[(d("100"), d("1"))], &[], 1, 0, Some(5), None);
        let continuous = book.apply_delta(&[(d("99"), d("1"))], &[], 2, 0, Some(6), Some(999));
        assert!(!continuous);
        assert_eq!(book.materialize(None).0.len(), 2);
    }

    #[test]
    fn materialize_respects_max_depth() {
        let mut book = OrderBook::new("X", 1);
        book.apply_snapshot(&[(d("100"), d("1")), (d("99"), d("1"))], &[], 1, 0, None, None);
        let (bids, _) = book.materialize(None);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].0, d("100"));
    }

    #[test]
    fn materialize_invalid_book_is_empty() {
        let book = OrderBook::new("X", 50);
        assert!(!book.is_valid());
        assert_eq!(book.materialize(None), (vec![], vec![]));
    }

    #[test]
    fn reset_clears_everything() {
        let mut book = OrderBook::new("X", 50);
        book.apply_snapshot(&[(d("100"), d("1"))], &[], 1, 5, Some(1), None);
        book.reset();
        assert!(!book.is_valid());
        assert_eq!(book.seq_id, None);
        assert_eq!(book.last_checksum, 0);
    }
}
