//! Stream session manager: one long-lived WebSocket connection, full
//! subscription replay on every (re)connect, full-jitter backoff on
//! failure, per-(channel, instId) demultiplexing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::book_handler::{BookHandler, ResubscribeRequest};
use crate::channels::ChannelBatchers;
use crate::error::IngestError;
use crate::frame::{Channel, DataFrame, SubscribeFrame};
use crate::metrics::MetricsSink;
use crate::parse;

/// spec.md §4.7: the venue pings roughly every 20s; a window of silence
/// (no ping, no data) this wide means the connection is dead even though
/// the TCP socket hasn't told us so yet.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Backoff,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribing => "subscribing",
            SessionState::Streaming => "streaming",
            SessionState::Backoff => "backoff",
        };
        write!(f, "{s}")
    }
}

/// `uniform(0, min(cap, base * 2^attempt))` — full-jitter backoff.
pub fn full_jitter_delay(base_secs: f64, cap_secs: f64, attempt: u32) -> Duration {
    let exp = base_secs * 2f64.powi(attempt as i32);
    let bounded = exp.min(cap_secs).max(0.0);
    let delay_secs = rand::thread_rng().gen_range(0.0..=bounded.max(f64::EPSILON));
    Duration::from_secs_f64(delay_secs)
}

pub struct SessionConfig {
    pub ws_url: String,
    pub channels: Vec<Channel>,
    pub instruments: Vec<String>,
    pub backoff_base_secs: f64,
    pub backoff_cap_secs: f64,
}

/// Tracks the reconnect attempt counter across the session's lifetime:
/// reset to zero the moment a connection reaches `Streaming`, incremented
/// on every failure that forces a reconnect/backoff cycle.
#[derive(Debug, Default)]
struct ReconnectTracker {
    attempt: u32,
}

impl ReconnectTracker {
    fn on_streaming(&mut self) {
        self.attempt = 0;
    }

    fn on_failure(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }
}

pub struct SessionManager {
    config: SessionConfig,
    batchers: Arc<ChannelBatchers>,
    book_handler: Arc<BookHandler>,
    cancel: CancellationToken,
    resubscribe_rx: mpsc::Receiver<ResubscribeRequest>,
    metrics: Arc<dyn MetricsSink>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        batchers: Arc<ChannelBatchers>,
        book_handler: Arc<BookHandler>,
        cancel: CancellationToken,
        resubscribe_rx: mpsc::Receiver<ResubscribeRequest>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        SessionManager { config, batchers, book_handler, cancel, resubscribe_rx, metrics }
    }

    pub async fn run(&mut self) {
        let mut tracker = ReconnectTracker::default();
        let mut state = SessionState::Disconnected;

        loop {
            if self.cancel.is_cancelled() {
                info!(%state, "session manager cancelled, exiting");
                return;
            }

            state = SessionState::Connecting;
            info!(%state, url = %self.config.ws_url, "connecting");

            match self.run_once(&mut state, &mut tracker).await {
                Ok(()) => {
                    // run_once only returns Ok on cooperative cancellation.
                    return;
                }
                Err(e) => {
                    error!(error = %e, attempt = tracker.attempt(), "session error, entering backoff");
                    self.metrics.incr_counter("reconnects_total", &[]);
                    if let Err(flush_err) = self.book_handler.on_reconnect(parse::now_ms()).await {
                        error!(error = %flush_err, "error materializing books on reconnect");
                    }

                    state = SessionState::Backoff;
                    let attempt = tracker.on_failure();
                    let delay = full_jitter_delay(
                        self.config.backoff_base_secs,
                        self.config.backoff_cap_secs,
                        attempt,
                    );
                    info!(%state, delay_ms = delay.as_millis() as u64, "backing off");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            info!("cancelled during backoff");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn run_once(
        &mut self,
        state: &mut SessionState,
        tracker: &mut ReconnectTracker,
    ) -> Result<(), IngestError> {
        let url = Url::parse(&self.config.ws_url)
            .map_err(|e| IngestError::Config(e.to_string()))?;
        let (ws_stream, _) =
            connect_async(url).await.map_err(|e| IngestError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        *state = SessionState::Subscribing;
        let sub = SubscribeFrame::new(&self.config.channels, &self.config.instruments);
        let payload =
            serde_json::to_string(&sub).map_err(|e| IngestError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        info!(%state, n_args = sub.args.len(), "sent subscription");

        *state = SessionState::Streaming;
        tracker.on_streaming();
        let mut last_activity = TokioInstant::now();

        loop {
            let deadline = last_activity + HEARTBEAT_TIMEOUT;
            tokio::select! {
                msg = read.next() => {
                    last_activity = TokioInstant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_text(&text).await {
                                warn!(error = %e, "error handling frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Err(IngestError::Transport("server closed connection".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(IngestError::Transport(e.to_string())),
                        None => return Err(IngestError::Transport("stream ended".to_string())),
                    }
                }
                resub = self.resubscribe_rx.recv() => {
                    if let Some(req) = resub {
                        if *state == SessionState::Streaming {
                            let single = SubscribeFrame::new(&[Channel::Book], &[req.inst_id.clone()]);
                            if let Ok(p) = serde_json::to_string(&single) {
                                let _ = write.send(Message::Text(p)).await;
                                info!(inst_id = %req.inst_id, "resubscribed after sequence gap");
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(IngestError::Transport(
                        "heartbeat timeout: no frames received from server".to_string(),
                    ));
                }
                _ = self.cancel.cancelled() => {
                    info!("session cancelled mid-stream");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Result<(), IngestError> {
        let frame: DataFrame = serde_json::from_str(text).map_err(|e| {
            self.metrics.incr_counter("parse_errors_total", &[]);
            IngestError::Protocol(e.to_string())
        })?;
        if frame.is_control_frame() {
            info!(response = %text, "server response");
            return Ok(());
        }
        let arg = frame.arg.as_ref().unwrap();
        let Some(channel) = Channel::from_wire(&arg.channel) else {
            warn!(channel = %arg.channel, "unknown channel");
            return Ok(());
        };
        let inst_id = arg.inst_id.clone();

        match channel {
            Channel::Trades => {
                for t in parse::parse_trades(&frame, &inst_id) {
                    self.batchers.append_trade(t).await?;
                }
            }
            Channel::FundingRate => {
                for r in parse::parse_funding_rates(&frame, &inst_id) {
                    self.batchers.append_funding_rate(r).await?;
                }
            }
            Channel::MarkPrice => {
                for m in parse::parse_mark_prices(&frame, &inst_id) {
                    self.batchers.append_mark_price(m).await?;
                }
            }
            Channel::Ticker => {
                for t in parse::parse_tickers(&frame, &inst_id) {
                    self.batchers.append_ticker(t).await?;
                }
            }
            Channel::OpenInterest => {
                for o in parse::parse_open_interests(&frame, &inst_id) {
                    self.batchers.append_open_interest(o).await?;
                }
            }
            Channel::IndexTicker => {
                for i in parse::parse_index_tickers(&frame, &inst_id) {
                    self.batchers.append_index_ticker(i).await?;
                }
            }
            Channel::Liquidation => {
                for l in parse::parse_liquidations(&frame, &inst_id) {
                    self.batchers.append_liquidation(l).await?;
                }
            }
            Channel::Book => {
                if frame.is_snapshot() {
                    self.book_handler.on_snapshot(&inst_id, &frame.data).await?;
                } else {
                    self.book_handler.on_delta(&inst_id, &frame.data).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 0..20 {
            let d = full_jitter_delay(0.5, 30.0, attempt);
            assert!(d.as_secs_f64() <= 30.0);
        }
    }

    #[test]
    fn backoff_grows_with_attempts_on_average() {
        // Not a statistical proof, just a sanity bound: attempt 0's range
        // is [0, base], attempt 10's range is [0, cap].
        let small = full_jitter_delay(0.5, 30.0, 0);
        assert!(small.as_secs_f64() <= 0.5);
    }

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
    }

    // End-to-end scenario: reconnect cycle resets the attempt counter the
    // moment the connection reaches Streaming, then counts up again
    // through the next failure/backoff cycle.
    #[test]
    fn reconnect_tracker_resets_on_streaming_and_counts_failures() {
        let mut tracker = ReconnectTracker::default();
        assert_eq!(tracker.on_failure(), 1);
        assert_eq!(tracker.on_failure(), 2);

        tracker.on_streaming();
        assert_eq!(tracker.attempt(), 0);

        assert_eq!(tracker.on_failure(), 1);
    }
}
