//! Startup/shutdown orchestration. Owns the strict ordering spec.md's
//! component design mandates: writer up first, session and scheduler
//! cancelled before the writer is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::book_handler::BookHandler;
use crate::channels::ChannelBatchers;
use crate::config::Config;
use crate::error::IngestError;
use crate::metrics::{AtomicMetricsSink, MetricsSink};
use crate::scheduler::Scheduler;
use crate::session::{SessionConfig, SessionManager};
use crate::writer::Writer;

/// Bound for the final defensive flush + writer close on shutdown, so a
/// wedged writer cannot hang the process indefinitely.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Supervisor {
    config: Config,
    writer: Arc<dyn Writer>,
}

impl Supervisor {
    pub fn new(config: Config, writer: Arc<dyn Writer>) -> Self {
        Supervisor { config, writer }
    }

    pub async fn run(self) -> Result<(), IngestError> {
        let metrics: Arc<dyn MetricsSink> = Arc::new(AtomicMetricsSink::new());
        let batchers = Arc::new(ChannelBatchers::new(
            self.writer.clone(),
            self.config.batch_max_size,
            metrics.clone(),
        ));
        let (resub_tx, resub_rx) = mpsc::channel(64);
        let book_handler = Arc::new(BookHandler::new(
            self.writer.clone(),
            self.config.batch_max_size,
            self.config.orderbook_max_depth,
            resub_tx,
            metrics.clone(),
        ));

        let session_cancel = CancellationToken::new();
        let scheduler_cancel = CancellationToken::new();

        let session_config = SessionConfig {
            ws_url: self.config.ws_url.clone(),
            channels: self.config.channels.clone(),
            instruments: self.config.instruments.clone(),
            backoff_base_secs: self.config.backoff_base_secs,
            backoff_cap_secs: self.config.backoff_cap_secs,
        };

        let mut session = SessionManager::new(
            session_config,
            batchers.clone(),
            book_handler.clone(),
            session_cancel.clone(),
            resub_rx,
            metrics.clone(),
        );
        let session_handle = tokio::spawn(async move { session.run().await });

        let scheduler = Scheduler::new(
            batchers.clone(),
            book_handler.clone(),
            self.config.flush_interval_ms,
            scheduler_cancel.clone(),
        );
        let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

        let snapshot_interval = Duration::from_secs(self.config.snapshot_interval_sec);
        let snapshot_book_handler = book_handler.clone();
        let snapshot_cancel = session_cancel.clone();
        let snapshot_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(snapshot_interval) => {
                        if let Err(e) = snapshot_book_handler
                            .materialize_all(crate::parse::now_ms())
                            .await
                        {
                            error!(error = %e, "periodic book materialization failed");
                        }
                    }
                    _ = snapshot_cancel.cancelled() => return,
                }
            }
        });

        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");

        session_cancel.cancel();
        let _ = session_handle.await;

        scheduler_cancel.cancel();
        let _ = scheduler_handle.await;
        let _ = snapshot_handle.await;

        let shutdown = drain_and_close(&batchers, &book_handler, self.writer.as_ref());

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
            error!("shutdown flush/close exceeded timeout, exiting anyway");
        }

        info!("shutdown complete");
        Ok(())
    }
}

/// The shutdown-drain guarantee: every batcher is flushed through the
/// writer before the writer itself is closed, so no buffered record is
/// lost on a clean shutdown.
async fn drain_and_close(batchers: &ChannelBatchers, book_handler: &BookHandler, writer: &dyn Writer) {
    if let Err(e) = batchers.flush_trades().await {
        error!(error = %e, "final flush failed for trades");
    }
    if let Err(e) = book_handler.flush_deltas().await {
        error!(error = %e, "final flush failed for book deltas");
    }
    if let Err(e) = book_handler.flush_snapshot_rows().await {
        error!(error = %e, "final flush failed for book snapshot rows");
    }
    if let Err(e) = batchers.flush_funding_rates().await {
        error!(error = %e, "final flush failed for funding rates");
    }
    if let Err(e) = batchers.flush_mark_prices().await {
        error!(error = %e, "final flush failed for mark prices");
    }
    if let Err(e) = batchers.flush_tickers().await {
        error!(error = %e, "final flush failed for tickers");
    }
    if let Err(e) = batchers.flush_open_interests().await {
        error!(error = %e, "final flush failed for open interest");
    }
    if let Err(e) = batchers.flush_index_tickers().await {
        error!(error = %e, "final flush failed for index tickers");
    }
    if let Err(e) = batchers.flush_liquidations().await {
        error!(error = %e, "final flush failed for liquidations");
    }
    if let Err(e) = writer.close().await {
        error!(error = %e, "writer close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::model::{
        BookDelta, BookSnapshotRow, FundingRate, IndexTicker, Liquidation, MarkPrice, OpenInterest,
        Ticker, Trade,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[derive(Default)]
    struct RecordingWriter {
        log: PlMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn append_trades(&self, _b: &[Trade]) -> Result<(), WriteError> {
            self.log.lock().push("append_trades");
            Ok(())
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
        async fn append_book_deltas(&self, _b: &[BookDelta]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn append_book_snapshot_rows(&self, _b: &[BookSnapshotRow]) -> Result<(), WriteError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), WriteError> {
            self.log.lock().push("close");
            Ok(())
        }
    }

    // End-to-end scenario: graceful shutdown drains buffered records
    // through the writer before the writer is closed.
    #[tokio::test]
    async fn drain_flushes_buffered_records_before_close() {
        let writer = Arc::new(RecordingWriter::default());
        let metrics: Arc<dyn MetricsSink> = Arc::new(AtomicMetricsSink::new());
        let batchers = ChannelBatchers::new(writer.clone(), 10, metrics.clone());
        let (resub_tx, _resub_rx) = mpsc::channel(8);
        let book_handler = BookHandler::new(writer.clone(), 10, 50, resub_tx, metrics);

        batchers
            .append_trade(Trade {
                inst_id: "BTC-USDT-SWAP".into(),
                ts_event: 1,
                trade_id: "1".into(),
                price: Decimal::from_str("1").unwrap(),
                size: Decimal::from_str("1").unwrap(),
                side: "buy".into(),
                ts_ingest: 1,
            })
            .await
            .unwrap();

        drain_and_close(&batchers, &book_handler, writer.as_ref()).await;

        assert_eq!(writer.log.lock().clone(), vec!["append_trades", "close"]);
    }
}
