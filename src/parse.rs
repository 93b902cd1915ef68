//! Frame-to-record parsing. Each `parse_*` function is called once per
//! inbound data frame, at demux time in `session.rs`, turning the raw
//! `serde_json::Value` entries into the typed records in `model.rs`.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::frame::DataFrame;
use crate::model::*;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decimal_field(v: &Value, key: &str) -> Decimal {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO)
}

fn i64_field(v: &Value, key: &str) -> i64 {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0)
}

fn u64_opt_field(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(|x| {
        x.as_u64().or_else(|| x.as_str().and_then(|s| s.parse().ok()))
    })
}

pub fn parse_trades(frame: &DataFrame, inst_id: &str) -> Vec<Trade> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| Trade {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            trade_id: str_field(d, "tradeId"),
            price: decimal_field(d, "px"),
            size: decimal_field(d, "sz"),
            side: str_field(d, "side"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_funding_rates(frame: &DataFrame, inst_id: &str) -> Vec<FundingRate> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| FundingRate {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            funding_rate: decimal_field(d, "fundingRate"),
            funding_time: i64_field(d, "fundingTime"),
            next_funding_time: i64_field(d, "nextFundingTime"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_mark_prices(frame: &DataFrame, inst_id: &str) -> Vec<MarkPrice> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| MarkPrice {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            mark_price: decimal_field(d, "markPx"),
            idx_px: decimal_field(d, "idxPx"),
            idx_ts: i64_field(d, "idxTs"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_tickers(frame: &DataFrame, inst_id: &str) -> Vec<Ticker> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| Ticker {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            last: decimal_field(d, "last"),
            last_size: decimal_field(d, "lastSz"),
            bid_price: decimal_field(d, "bidPx"),
            bid_size: decimal_field(d, "bidSz"),
            ask_price: decimal_field(d, "askPx"),
            ask_size: decimal_field(d, "askSz"),
            open_24h: decimal_field(d, "open24h"),
            high_24h: decimal_field(d, "high24h"),
            low_24h: decimal_field(d, "low24h"),
            vol_24h: decimal_field(d, "vol24h"),
            vol_ccy_24h: decimal_field(d, "volCcy24h"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_open_interests(frame: &DataFrame, inst_id: &str) -> Vec<OpenInterest> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| OpenInterest {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            open_interest: decimal_field(d, "oi"),
            open_interest_ccy: decimal_field(d, "oiCcy"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_index_tickers(frame: &DataFrame, inst_id: &str) -> Vec<IndexTicker> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| IndexTicker {
            inst_id: inst_id.to_string(),
            ts_event: i64_field(d, "ts"),
            index_price: decimal_field(d, "idxPx"),
            open_24h: decimal_field(d, "open24h"),
            high_24h: decimal_field(d, "high24h"),
            low_24h: decimal_field(d, "low24h"),
            sod_utc0: decimal_field(d, "sodUtc0"),
            sod_utc8: decimal_field(d, "sodUtc8"),
            ts_ingest,
        })
        .collect()
}

pub fn parse_liquidations(frame: &DataFrame, inst_id: &str) -> Vec<Liquidation> {
    let ts_ingest = now_ms();
    frame
        .data
        .iter()
        .map(|d| Liquidation {
            inst_id: inst_id.to_string(),
            pos_side: str_field(d, "posSide"),
            side: str_field(d, "side"),
            size: decimal_field(d, "sz"),
            bankruptcy_price: decimal_field(d, "bkPx"),
            bankruptcy_loss: decimal_field(d, "bkLoss"),
            currency: str_field(d, "ccy"),
            ts_event: i64_field(d, "ts"),
            ts_ingest,
        })
        .collect()
}

/// Extracts bid/ask level rows (`[price, size, ...]`) from a book data
/// entry. The venue may append extra fields (order count); we only need
/// the first two.
pub fn levels(raw: &Value, key: &str) -> Vec<(Decimal, Decimal)> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|lvl| {
                    let arr = lvl.as_array()?;
                    let price = arr.first()?.as_str()?.parse().ok()?;
                    let size = arr.get(1)?.as_str()?.parse().ok()?;
                    Some((price, size))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn book_ts_event(raw: &Value) -> i64 {
    i64_field(raw, "ts")
}

pub fn book_checksum(raw: &Value) -> i64 {
    raw.get("checksum").and_then(Value::as_i64).unwrap_or(0)
}

pub fn book_seq_id(raw: &Value) -> Option<u64> {
    u64_opt_field(raw, "seqId")
}

pub fn book_prev_seq_id(raw: &Value) -> Option<u64> {
    u64_opt_field(raw, "prevSeqId")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataFrame;

    fn frame_with(data: Vec<Value>) -> DataFrame {
        DataFrame { arg: None, action: None, data, event: None, code: None }
    }

    #[test]
    fn trade_missing_fields_zero_fill() {
        let f = frame_with(vec![serde_json::json!({})]);
        let trades = parse_trades(&f, "BTC-USDT-SWAP");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, Decimal::ZERO);
        assert_eq!(trades[0].trade_id, "");
    }

    #[test]
    fn empty_data_yields_no_records() {
        let f = frame_with(vec![]);
        assert!(parse_trades(&f, "BTC-USDT-SWAP").is_empty());
    }

    #[test]
    fn levels_parses_price_size_pairs() {
        let raw = serde_json::json!({"bids": [["100.5", "2", "0", "1"]]});
        let lv = levels(&raw, "bids");
        assert_eq!(lv, vec![(Decimal::from_str("100.5").unwrap(), Decimal::from_str("2").unwrap())]);
    }

    #[test]
    fn levels_skips_unparsable() {
        let raw = serde_json::json!({"bids": [["nan", "2"]]});
        assert!(levels(&raw, "bids").is_empty());
    }
}
