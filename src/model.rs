//! Typed per-channel records. Every field defaults to zero/empty-string
//! rather than failing to parse — see `parse.rs`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub inst_id: String,
    pub ts_event: i64,
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: String,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub inst_id: String,
    pub ts_event: i64,
    pub funding_rate: Decimal,
    pub funding_time: i64,
    pub next_funding_time: i64,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPrice {
    pub inst_id: String,
    pub ts_event: i64,
    pub mark_price: Decimal,
    pub idx_px: Decimal,
    pub idx_ts: i64,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub inst_id: String,
    pub ts_event: i64,
    pub last: Decimal,
    pub last_size: Decimal,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub vol_24h: Decimal,
    pub vol_ccy_24h: Decimal,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub inst_id: String,
    pub ts_event: i64,
    pub open_interest: Decimal,
    pub open_interest_ccy: Decimal,
    pub ts_ingest: i64,
}

/// Given no schema in spec.md either; recovered from the source's
/// index-tickers handler, which records the full 24h-range payload, not
/// just the index price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTicker {
    pub inst_id: String,
    pub ts_event: i64,
    pub index_price: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub sod_utc0: Decimal,
    pub sod_utc8: Decimal,
    pub ts_ingest: i64,
}

/// A channel kind listed in the subscription set but given no schema in
/// the original distillation; recovered from the source's liquidations
/// handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub inst_id: String,
    pub pos_side: String,
    pub side: String,
    pub size: Decimal,
    pub bankruptcy_price: Decimal,
    pub bankruptcy_loss: Decimal,
    pub currency: String,
    pub ts_event: i64,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub inst_id: String,
    pub ts_event: i64,
    pub seq_id: Option<u64>,
    pub prev_seq_id: Option<u64>,
    pub checksum: i64,
    pub continuous: bool,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub ts_ingest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshotRow {
    pub snapshot_id: String,
    pub inst_id: String,
    pub ts_event: i64,
    pub side: BookSide,
    pub price: Decimal,
    pub size: Decimal,
    pub level: u16,
}
