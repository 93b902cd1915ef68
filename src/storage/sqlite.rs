//! Reference [`Writer`] backend. One table per record kind, each keyed so
//! that re-delivering the same record is a no-op (`INSERT OR IGNORE`) —
//! the idempotency-key design mirrors the original Postgres schema's
//! composite primary keys and `ON CONFLICT DO NOTHING` writes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use crate::error::WriteError;
use crate::model::*;
use crate::writer::Writer;

pub struct SqliteWriter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWriter {
    pub fn open(path: &str) -> Result<Self, WriteError> {
        let conn = Connection::open(path)
            .map_err(|e| WriteError::Fatal(format!("sqlite open failed: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WriteError::Fatal(format!("sqlite schema init failed: {e}")))?;
        Ok(SqliteWriter { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<F>(&self, f: F) -> Result<(), WriteError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| WriteError::Transient(format!("writer task join error: {e}")))?
        .map_err(|e| WriteError::Transient(format!("sqlite write failed: {e}")))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trades (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, trade_id TEXT NOT NULL,
    price TEXT NOT NULL, size TEXT NOT NULL, side TEXT NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event, trade_id)
);
CREATE TABLE IF NOT EXISTS funding_rates (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, funding_rate TEXT NOT NULL,
    funding_time INTEGER NOT NULL, next_funding_time INTEGER NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event)
);
CREATE TABLE IF NOT EXISTS mark_prices (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, mark_price TEXT NOT NULL,
    idx_px TEXT NOT NULL, idx_ts INTEGER NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event)
);
CREATE TABLE IF NOT EXISTS tickers (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, last TEXT NOT NULL, last_size TEXT NOT NULL,
    bid_price TEXT NOT NULL, bid_size TEXT NOT NULL, ask_price TEXT NOT NULL, ask_size TEXT NOT NULL,
    open_24h TEXT NOT NULL, high_24h TEXT NOT NULL, low_24h TEXT NOT NULL,
    vol_24h TEXT NOT NULL, vol_ccy_24h TEXT NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event)
);
CREATE TABLE IF NOT EXISTS open_interests (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, open_interest TEXT NOT NULL,
    open_interest_ccy TEXT NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event)
);
CREATE TABLE IF NOT EXISTS index_tickers (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, index_price TEXT NOT NULL,
    open_24h TEXT NOT NULL, high_24h TEXT NOT NULL, low_24h TEXT NOT NULL,
    sod_utc0 TEXT NOT NULL, sod_utc8 TEXT NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event)
);
CREATE TABLE IF NOT EXISTS liquidations (
    inst_id TEXT NOT NULL, pos_side TEXT NOT NULL, side TEXT NOT NULL, size TEXT NOT NULL,
    bankruptcy_price TEXT NOT NULL, bankruptcy_loss TEXT NOT NULL, currency TEXT NOT NULL,
    ts_event INTEGER NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event, side)
);
CREATE TABLE IF NOT EXISTS book_deltas (
    inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL, seq_id INTEGER, prev_seq_id INTEGER,
    checksum INTEGER NOT NULL, continuous INTEGER NOT NULL,
    bids TEXT NOT NULL, asks TEXT NOT NULL, ts_ingest INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event, seq_id)
);
CREATE TABLE IF NOT EXISTS book_snapshot_rows (
    snapshot_id TEXT NOT NULL, inst_id TEXT NOT NULL, ts_event INTEGER NOT NULL,
    side TEXT NOT NULL, price TEXT NOT NULL, size TEXT NOT NULL, level INTEGER NOT NULL,
    PRIMARY KEY (inst_id, ts_event, snapshot_id, side, price)
);
";

#[async_trait]
impl Writer for SqliteWriter {
    async fn append_trades(&self, batch: &[Trade]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for t in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO trades (inst_id, ts_event, trade_id, price, size, side, ts_ingest)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![t.inst_id, t.ts_event, t.trade_id, t.price.to_string(), t.size.to_string(), t.side, t.ts_ingest],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_funding_rates(&self, batch: &[FundingRate]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for r in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO funding_rates (inst_id, ts_event, funding_rate, funding_time, next_funding_time, ts_ingest)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![r.inst_id, r.ts_event, r.funding_rate.to_string(), r.funding_time, r.next_funding_time, r.ts_ingest],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_mark_prices(&self, batch: &[MarkPrice]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for m in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO mark_prices (inst_id, ts_event, mark_price, idx_px, idx_ts, ts_ingest)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![m.inst_id, m.ts_event, m.mark_price.to_string(), m.idx_px.to_string(), m.idx_ts, m.ts_ingest],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_tickers(&self, batch: &[Ticker]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for t in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO tickers (inst_id, ts_event, last, last_size, bid_price, bid_size,
                     ask_price, ask_size, open_24h, high_24h, low_24h, vol_24h, vol_ccy_24h, ts_ingest)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                    params![
                        t.inst_id, t.ts_event, t.last.to_string(), t.last_size.to_string(),
                        t.bid_price.to_string(), t.bid_size.to_string(), t.ask_price.to_string(), t.ask_size.to_string(),
                        t.open_24h.to_string(), t.high_24h.to_string(), t.low_24h.to_string(),
                        t.vol_24h.to_string(), t.vol_ccy_24h.to_string(), t.ts_ingest
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_open_interests(&self, batch: &[OpenInterest]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for o in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO open_interests (inst_id, ts_event, open_interest, open_interest_ccy, ts_ingest)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![o.inst_id, o.ts_event, o.open_interest.to_string(), o.open_interest_ccy.to_string(), o.ts_ingest],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_index_tickers(&self, batch: &[IndexTicker]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for i in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO index_tickers (inst_id, ts_event, index_price, open_24h, high_24h,
                     low_24h, sod_utc0, sod_utc8, ts_ingest)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        i.inst_id, i.ts_event, i.index_price.to_string(), i.open_24h.to_string(),
                        i.high_24h.to_string(), i.low_24h.to_string(), i.sod_utc0.to_string(),
                        i.sod_utc8.to_string(), i.ts_ingest
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_liquidations(&self, batch: &[Liquidation]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for l in &batch {
                conn.execute(
                    "INSERT OR IGNORE INTO liquidations (inst_id, pos_side, side, size, bankruptcy_price,
                     bankruptcy_loss, currency, ts_event, ts_ingest)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        l.inst_id, l.pos_side, l.side, l.size.to_string(), l.bankruptcy_price.to_string(),
                        l.bankruptcy_loss.to_string(), l.currency, l.ts_event, l.ts_ingest
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_book_deltas(&self, batch: &[BookDelta]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for d in &batch {
                let bids = serde_json::to_string(&d.bids).unwrap_or_default();
                let asks = serde_json::to_string(&d.asks).unwrap_or_default();
                conn.execute(
                    "INSERT OR IGNORE INTO book_deltas (inst_id, ts_event, seq_id, prev_seq_id, checksum,
                     continuous, bids, asks, ts_ingest)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        d.inst_id, d.ts_event, d.seq_id.map(|v| v as i64), d.prev_seq_id.map(|v| v as i64),
                        d.checksum, d.continuous as i64, bids, asks, d.ts_ingest
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn append_book_snapshot_rows(&self, batch: &[BookSnapshotRow]) -> Result<(), WriteError> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            for r in &batch {
                let side = match r.side {
                    BookSide::Bid => "bid",
                    BookSide::Ask => "ask",
                };
                conn.execute(
                    "INSERT OR IGNORE INTO book_snapshot_rows (snapshot_id, inst_id, ts_event, side, price, size, level)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    params![r.snapshot_id, r.inst_id, r.ts_event, side, r.price.to_string(), r.size.to_string(), r.level],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), WriteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[tokio::test]
    async fn append_trades_is_idempotent() {
        let writer = SqliteWriter::open(":memory:").unwrap();
        let trade = Trade {
            inst_id: "BTC-USDT-SWAP".into(),
            ts_event: 1,
            trade_id: "t1".into(),
            price: Decimal::from_str("100").unwrap(),
            size: Decimal::from_str("1").unwrap(),
            side: "buy".into(),
            ts_ingest: 2,
        };
        writer.append_trades(&[trade.clone()]).await.unwrap();
        writer.append_trades(&[trade]).await.unwrap();

        let count: i64 = writer
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
