//! Owns every instrument's order book plus the delta/snapshot-row
//! batchers, and dispatches snapshot/delta frames into them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::batcher::{self, Batcher};
use crate::book::OrderBook;
use crate::error::WriteError;
use crate::metrics::MetricsSink;
use crate::model::{BookDelta, BookSide, BookSnapshotRow};
use crate::parse;
use crate::writer::Writer;

/// A gap that requires a per-instrument resubscribe (sequence
/// discontinuity in a delta).
pub struct ResubscribeRequest {
    pub inst_id: String,
}

pub struct BookHandler {
    books: Mutex<HashMap<String, OrderBook>>,
    deltas: Batcher<BookDelta>,
    snapshot_rows: Batcher<BookSnapshotRow>,
    max_depth: usize,
    writer: Arc<dyn Writer>,
    resubscribe_tx: mpsc::Sender<ResubscribeRequest>,
    metrics: Arc<dyn MetricsSink>,
}

impl BookHandler {
    pub fn new(
        writer: Arc<dyn Writer>,
        batch_max_size: usize,
        max_depth: usize,
        resubscribe_tx: mpsc::Sender<ResubscribeRequest>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        BookHandler {
            books: Mutex::new(HashMap::new()),
            deltas: Batcher::new(batch_max_size),
            snapshot_rows: Batcher::new(batch_max_size),
            max_depth,
            writer,
            resubscribe_tx,
            metrics,
        }
    }

    /// Records a writer-transient-failure counter (spec.md §7) whenever a
    /// flush comes back `Err`, then passes the result through unchanged.
    fn note<T>(&self, component: &str, result: Result<T, WriteError>) -> Result<T, WriteError> {
        if result.is_err() {
            self.metrics.incr_counter("write_errors_total", &[("channel", component)]);
        }
        result
    }

    fn snapshot_rows_for(&self, inst_id: &str, ts_event: i64) -> Vec<BookSnapshotRow> {
        let books = self.books.lock();
        let Some(book) = books.get(inst_id) else {
            return Vec::new();
        };
        if !book.is_valid() {
            return Vec::new();
        }
        let snapshot_id = Uuid::new_v4().to_string();
        let (bids, asks) = book.materialize(None);
        rows_from(&snapshot_id, inst_id, ts_event, bids, asks)
    }

    /// Applies an inbound snapshot frame and immediately materializes one
    /// snapshot-row set under a fresh id.
    pub async fn on_snapshot(
        &self,
        inst_id: &str,
        raw: &[serde_json::Value],
    ) -> Result<(), WriteError> {
        let Some(entry) = raw.first() else { return Ok(()) };
        let bids = parse::levels(entry, "bids");
        let asks = parse::levels(entry, "asks");
        let ts_event = parse::book_ts_event(entry);
        let checksum = parse::book_checksum(entry);
        let seq_id = parse::book_seq_id(entry);
        let prev_seq_id = parse::book_prev_seq_id(entry);

        {
            let mut books = self.books.lock();
            let book = books
                .entry(inst_id.to_string())
                .or_insert_with(|| OrderBook::new(inst_id, self.max_depth));
            book.apply_snapshot(&bids, &asks, ts_event, checksum, seq_id, prev_seq_id);
        }

        let rows = self.snapshot_rows_for(inst_id, ts_event);
        self.append_snapshot_rows(rows).await
    }

    /// Applies an inbound delta frame. Always records the delta; on
    /// sequence discontinuity, materializes once, resets the book, and
    /// requests a resubscribe.
    pub async fn on_delta(
        &self,
        inst_id: &str,
        raw: &[serde_json::Value],
    ) -> Result<(), WriteError> {
        let Some(entry) = raw.first() else { return Ok(()) };
        let bids = parse::levels(entry, "bids");
        let asks = parse::levels(entry, "asks");
        let ts_event = parse::book_ts_event(entry);
        let checksum = parse::book_checksum(entry);
        let seq_id = parse::book_seq_id(entry);
        let prev_seq_id = parse::book_prev_seq_id(entry);

        let continuous = {
            let mut books = self.books.lock();
            let book = books
                .entry(inst_id.to_string())
                .or_insert_with(|| OrderBook::new(inst_id, self.max_depth));
            if !book.is_valid() {
                // No snapshot yet: treat as an out-of-order delta, drop
                // the mutation but still record it for audit purposes.
                false
            } else {
                book.apply_delta(&bids, &asks, ts_event, checksum, seq_id, prev_seq_id)
            }
        };

        let delta = BookDelta {
            inst_id: inst_id.to_string(),
            ts_event,
            seq_id,
            prev_seq_id,
            checksum,
            continuous,
            bids,
            asks,
            ts_ingest: parse::now_ms(),
        };

        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.deltas, delta, |batch| async move {
            writer.append_book_deltas(&batch).await
        })
        .await;
        self.note("book_deltas", result)?;

        if !continuous {
            warn!(inst_id, "sequence discontinuity, forcing resync");
            let rows = self.snapshot_rows_for(inst_id, ts_event);
            self.append_snapshot_rows(rows).await?;
            if let Some(b) = self.books.lock().get_mut(inst_id) {
                b.reset();
            }
            let _ = self
                .resubscribe_tx
                .send(ResubscribeRequest { inst_id: inst_id.to_string() })
                .await;
        }

        Ok(())
    }

    /// Materializes every valid book once, on a fixed cadence.
    pub async fn materialize_all(&self, ts_event: i64) -> Result<(), WriteError> {
        let inst_ids: Vec<String> = self.books.lock().keys().cloned().collect();
        let mut rows = Vec::new();
        for inst_id in inst_ids {
            rows.extend(self.snapshot_rows_for(&inst_id, ts_event));
        }
        self.append_snapshot_rows(rows).await
    }

    /// Called when the session reconnects: materialize every valid book
    /// before the connection drops further.
    pub async fn on_reconnect(&self, ts_event: i64) -> Result<(), WriteError> {
        self.materialize_all(ts_event).await
    }

    async fn append_snapshot_rows(&self, rows: Vec<BookSnapshotRow>) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in rows {
            let writer = self.writer.clone();
            let result = batcher::append_and_maybe_write(&self.snapshot_rows, row, |batch| async move {
                writer.append_book_snapshot_rows(&batch).await
            })
            .await;
            self.note("book_snapshot_rows", result)?;
        }
        Ok(())
    }

    pub async fn flush_deltas(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result =
            batcher::flush(&self.deltas, |batch| async move { writer.append_book_deltas(&batch).await })
                .await;
        self.note("book_deltas", result)
    }

    pub async fn flush_snapshot_rows(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.snapshot_rows, |batch| async move {
            writer.append_book_snapshot_rows(&batch).await
        })
        .await;
        self.note("book_snapshot_rows", result)
    }
}

fn rows_from(
    snapshot_id: &str,
    inst_id: &str,
    ts_event: i64,
    bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
) -> Vec<BookSnapshotRow> {
    let mut rows = Vec::with_capacity(bids.len() + asks.len());
    for (idx, (price, size)) in bids.into_iter().enumerate() {
        rows.push(BookSnapshotRow {
            snapshot_id: snapshot_id.to_string(),
            inst_id: inst_id.to_string(),
            ts_event,
            side: BookSide::Bid,
            price,
            size,
            level: (idx + 1) as u16,
        });
    }
    for (idx, (price, size)) in asks.into_iter().enumerate() {
        rows.push(BookSnapshotRow {
            snapshot_id: snapshot_id.to_string(),
            inst_id: inst_id.to_string(),
            ts_event,
            side: BookSide::Ask,
            price,
            size,
            level: (idx + 1) as u16,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AtomicMetricsSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWriter {
        deltas: AtomicUsize,
        rows: AtomicUsize,
    }

    #[async_trait]
    impl Writer for CountingWriter {
        async fn append_trades(&self, _b: &[crate::model::Trade]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_funding_rates(&self, _b: &[crate::model::FundingRate]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_mark_prices(&self, _b: &[crate::model::MarkPrice]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_tickers(&self, _b: &[crate::model::Ticker]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_open_interests(&self, _b: &[crate::model::OpenInterest]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_index_tickers(&self, _b: &[crate::model::IndexTicker]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_liquidations(&self, _b: &[crate::model::Liquidation]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_book_deltas(&self, b: &[BookDelta]) -> Result<(), WriteError> {
            self.deltas.fetch_add(b.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn append_book_snapshot_rows(&self, b: &[BookSnapshotRow]) -> Result<(), WriteError> {
            self.rows.fetch_add(b.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> Result<(), WriteError> {
            Ok(())
        }
    }

    fn entry(bids: &str, asks: &str, ts: i64, seq: u64, prev: Option<u64>) -> serde_json::Value {
        serde_json::json!({"bids": serde_json::from_str::<serde_json::Value>(bids).unwrap(),
                            "asks": serde_json::from_str::<serde_json::Value>(asks).unwrap(),
                            "ts": ts.to_string(), "checksum": 0, "seqId": seq, "prevSeqId": prev})
    }

    #[tokio::test]
    async fn snapshot_then_delta_materializes_rows() {
        let writer = Arc::new(CountingWriter::default());
        let (tx, _rx) = mpsc::channel(8);
        let metrics = Arc::new(AtomicMetricsSink::new());
        let handler = BookHandler::new(writer.clone(), 1, 50, tx, metrics);

        let snap = entry(r#"[["100","1"]]"#, r#"[["101","1"]]"#, 1, 1, None);
        handler.on_snapshot("BTC-USDT-SWAP", &[snap]).await.unwrap();
        assert_eq!(writer.rows.load(Ordering::SeqCst), 2);

        let delta = entry(r#"[["100","0"]]"#, r#"[]"#, 2, 2, Some(1));
        handler.on_delta("BTC-USDT-SWAP", &[delta]).await.unwrap();
        assert_eq!(writer.deltas.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequence_gap_triggers_resubscribe() {
        let writer = Arc::new(CountingWriter::default());
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = Arc::new(AtomicMetricsSink::new());
        let handler = BookHandler::new(writer, 1, 50, tx, metrics);

        let snap = entry(r#"[["100","1"]]"#, r#"[]"#, 1, 1, None);
        handler.on_snapshot("BTC-USDT-SWAP", &[snap]).await.unwrap();

        let bad_delta = entry(r#"[["99","1"]]"#, r#"[]"#, 2, 99, Some(12345));
        handler.on_delta("BTC-USDT-SWAP", &[bad_delta]).await.unwrap();

        let req = rx.try_recv().unwrap();
        assert_eq!(req.inst_id, "BTC-USDT-SWAP");
    }
}
