//! Periodic flush scheduler: ticks every `flush_interval`, flushing every
//! batcher in a fixed order so one handler's failure never blocks the
//! rest. On cancellation, performs exactly one more flush pass before
//! exiting — the shutdown-drain guarantee.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::book_handler::BookHandler;
use crate::channels::ChannelBatchers;

pub struct Scheduler {
    batchers: Arc<ChannelBatchers>,
    book_handler: Arc<BookHandler>,
    flush_interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        batchers: Arc<ChannelBatchers>,
        book_handler: Arc<BookHandler>,
        flush_interval_ms: u64,
        cancel: CancellationToken,
    ) -> Self {
        Scheduler {
            batchers,
            book_handler,
            flush_interval: Duration::from_millis(flush_interval_ms),
            cancel,
        }
    }

    async fn flush_all(&self) {
        if let Err(e) = self.batchers.flush_trades().await {
            error!(error = %e, "flush failed for trades");
        }
        if let Err(e) = self.book_handler.flush_deltas().await {
            error!(error = %e, "flush failed for book deltas");
        }
        if let Err(e) = self.book_handler.flush_snapshot_rows().await {
            error!(error = %e, "flush failed for book snapshot rows");
        }
        if let Err(e) = self.batchers.flush_funding_rates().await {
            error!(error = %e, "flush failed for funding rates");
        }
        if let Err(e) = self.batchers.flush_mark_prices().await {
            error!(error = %e, "flush failed for mark prices");
        }
        if let Err(e) = self.batchers.flush_tickers().await {
            error!(error = %e, "flush failed for tickers");
        }
        if let Err(e) = self.batchers.flush_open_interests().await {
            error!(error = %e, "flush failed for open interest");
        }
        if let Err(e) = self.batchers.flush_index_tickers().await {
            error!(error = %e, "flush failed for index tickers");
        }
        if let Err(e) = self.batchers.flush_liquidations().await {
            error!(error = %e, "flush failed for liquidations");
        }
    }

    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.flush_interval) => {
                    self.flush_all().await;
                }
                _ = self.cancel.cancelled() => {
                    info!("flush scheduler cancelled, performing final flush");
                    self.flush_all().await;
                    return;
                }
            }
        }
    }
}
