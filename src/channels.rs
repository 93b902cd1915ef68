//! Batchers for every non-book channel kind. Book deltas and snapshot
//! rows are batched inside [`crate::book_handler::BookHandler`] since
//! they share its order-book state.

use std::sync::Arc;

use crate::batcher::{self, Batcher};
use crate::error::WriteError;
use crate::metrics::MetricsSink;
use crate::model::{FundingRate, IndexTicker, Liquidation, MarkPrice, OpenInterest, Ticker, Trade};
use crate::writer::Writer;

pub struct ChannelBatchers {
    trades: Batcher<Trade>,
    funding_rates: Batcher<FundingRate>,
    mark_prices: Batcher<MarkPrice>,
    tickers: Batcher<Ticker>,
    open_interests: Batcher<OpenInterest>,
    index_tickers: Batcher<IndexTicker>,
    liquidations: Batcher<Liquidation>,
    writer: Arc<dyn Writer>,
    metrics: Arc<dyn MetricsSink>,
}

impl ChannelBatchers {
    pub fn new(writer: Arc<dyn Writer>, batch_max_size: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        ChannelBatchers {
            trades: Batcher::new(batch_max_size),
            funding_rates: Batcher::new(batch_max_size),
            mark_prices: Batcher::new(batch_max_size),
            tickers: Batcher::new(batch_max_size),
            open_interests: Batcher::new(batch_max_size),
            index_tickers: Batcher::new(batch_max_size),
            liquidations: Batcher::new(batch_max_size),
            writer,
            metrics,
        }
    }

    /// Records a writer-transient-failure counter (spec.md §7) whenever a
    /// flush through this channel comes back `Err`, then passes the
    /// result through unchanged.
    fn note<T>(&self, channel: &str, result: Result<T, WriteError>) -> Result<T, WriteError> {
        if result.is_err() {
            self.metrics.incr_counter("write_errors_total", &[("channel", channel)]);
        }
        result
    }

    pub async fn append_trade(&self, record: Trade) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.trades, record, |batch| async move {
            writer.append_trades(&batch).await
        })
        .await;
        self.note("trades", result)
    }

    pub async fn append_funding_rate(&self, record: FundingRate) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.funding_rates, record, |batch| async move {
            writer.append_funding_rates(&batch).await
        })
        .await;
        self.note("funding_rates", result)
    }

    pub async fn append_mark_price(&self, record: MarkPrice) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.mark_prices, record, |batch| async move {
            writer.append_mark_prices(&batch).await
        })
        .await;
        self.note("mark_prices", result)
    }

    pub async fn append_ticker(&self, record: Ticker) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.tickers, record, |batch| async move {
            writer.append_tickers(&batch).await
        })
        .await;
        self.note("tickers", result)
    }

    pub async fn append_open_interest(&self, record: OpenInterest) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.open_interests, record, |batch| async move {
            writer.append_open_interests(&batch).await
        })
        .await;
        self.note("open_interests", result)
    }

    pub async fn append_index_ticker(&self, record: IndexTicker) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.index_tickers, record, |batch| async move {
            writer.append_index_tickers(&batch).await
        })
        .await;
        self.note("index_tickers", result)
    }

    pub async fn append_liquidation(&self, record: Liquidation) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::append_and_maybe_write(&self.liquidations, record, |batch| async move {
            writer.append_liquidations(&batch).await
        })
        .await;
        self.note("liquidations", result)
    }

    pub async fn flush_trades(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result =
            batcher::flush(&self.trades, |batch| async move { writer.append_trades(&batch).await })
                .await;
        self.note("trades", result)
    }

    pub async fn flush_funding_rates(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.funding_rates, |batch| async move {
            writer.append_funding_rates(&batch).await
        })
        .await;
        self.note("funding_rates", result)
    }

    pub async fn flush_mark_prices(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.mark_prices, |batch| async move {
            writer.append_mark_prices(&batch).await
        })
        .await;
        self.note("mark_prices", result)
    }

    pub async fn flush_tickers(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result =
            batcher::flush(&self.tickers, |batch| async move { writer.append_tickers(&batch).await })
                .await;
        self.note("tickers", result)
    }

    pub async fn flush_open_interests(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.open_interests, |batch| async move {
            writer.append_open_interests(&batch).await
        })
        .await;
        self.note("open_interests", result)
    }

    pub async fn flush_index_tickers(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.index_tickers, |batch| async move {
            writer.append_index_tickers(&batch).await
        })
        .await;
        self.note("index_tickers", result)
    }

    pub async fn flush_liquidations(&self) -> Result<(), WriteError> {
        let writer = self.writer.clone();
        let result = batcher::flush(&self.liquidations, |batch| async move {
            writer.append_liquidations(&batch).await
        })
        .await;
        self.note("liquidations", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AtomicMetricsSink;
    use crate::storage::sqlite::SqliteWriter;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[tokio::test]
    async fn append_flushes_at_threshold() {
        let writer = Arc::new(SqliteWriter::open(":memory:").unwrap());
        let metrics = Arc::new(AtomicMetricsSink::new());
        let batchers = ChannelBatchers::new(writer, 2, metrics);
        let trade = |id: &str| Trade {
            inst_id: "BTC-USDT-SWAP".into(),
            ts_event: 1,
            trade_id: id.into(),
            price: Decimal::from_str("1").unwrap(),
            size: Decimal::from_str("1").unwrap(),
            side: "buy".into(),
            ts_ingest: 1,
        };
        batchers.append_trade(trade("1")).await.unwrap();
        batchers.append_trade(trade("2")).await.unwrap();
        // Threshold of 2 reached: buffer was swapped and written, next
        // flush should be a no-op.
        batchers.flush_trades().await.unwrap();
    }

    struct FailingWriter;

    #[async_trait::async_trait]
    impl Writer for FailingWriter {
        async fn append_trades(&self, _b: &[Trade]) -> Result<(), WriteError> {
            Err(WriteError::Transient("disk full".into()))
        }
        async fn append_funding_rates(&self, _b: &[FundingRate]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_mark_prices(&self, _b: &[MarkPrice]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_tickers(&self, _b: &[Ticker]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_open_interests(&self, _b: &[OpenInterest]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_index_tickers(&self, _b: &[IndexTicker]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_liquidations(&self, _b: &[Liquidation]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_book_deltas(&self, _b: &[crate::model::BookDelta]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_book_snapshot_rows(
            &self,
            _b: &[crate::model::BookSnapshotRow],
        ) -> Result<(), WriteError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), WriteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_failure_increments_counter() {
        let writer = Arc::new(FailingWriter);
        let metrics = Arc::new(AtomicMetricsSink::new());
        let batchers = ChannelBatchers::new(writer, 1, metrics.clone());
        let trade = Trade {
            inst_id: "BTC-USDT-SWAP".into(),
            ts_event: 1,
            trade_id: "1".into(),
            price: Decimal::from_str("1").unwrap(),
            size: Decimal::from_str("1").unwrap(),
            side: "buy".into(),
            ts_ingest: 1,
        };
        assert!(batchers.append_trade(trade).await.is_err());
        assert_eq!(metrics.counter_value("write_errors_total", &[("channel", "trades")]), 1);
    }
}
