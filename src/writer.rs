//! The downstream storage boundary. `Writer` is the interface every
//! batcher flushes through; `storage::sqlite::SqliteWriter` is the one
//! concrete implementation this crate ships.

use async_trait::async_trait;

use crate::error::WriteError;
use crate::model::{
    BookDelta, BookSnapshotRow, FundingRate, IndexTicker, Liquidation, MarkPrice, OpenInterest,
    Ticker, Trade,
};

#[async_trait]
pub trait Writer: Send + Sync {
    async fn append_trades(&self, batch: &[Trade]) -> Result<(), WriteError>;
    async fn append_funding_rates(&self, batch: &[FundingRate]) -> Result<(), WriteError>;
    async fn append_mark_prices(&self, batch: &[MarkPrice]) -> Result<(), WriteError>;
    async fn append_tickers(&self, batch: &[Ticker]) -> Result<(), WriteError>;
    async fn append_open_interests(&self, batch: &[OpenInterest]) -> Result<(), WriteError>;
    async fn append_index_tickers(&self, batch: &[IndexTicker]) -> Result<(), WriteError>;
    async fn append_liquidations(&self, batch: &[Liquidation]) -> Result<(), WriteError>;
    async fn append_book_deltas(&self, batch: &[BookDelta]) -> Result<(), WriteError>;
    async fn append_book_snapshot_rows(&self, batch: &[BookSnapshotRow]) -> Result<(), WriteError>;

    async fn close(&self) -> Result<(), WriteError>;
}
