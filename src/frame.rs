//! Venue wire shapes: the subscribe frame we send and the data frame we
//! receive, plus the `Channel` enum that names what a frame carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Trades,
    FundingRate,
    MarkPrice,
    Ticker,
    OpenInterest,
    IndexTicker,
    Liquidation,
    Book,
}

impl Channel {
    /// Map a venue wire channel name to a `Channel`. All book-family
    /// variants (`books`, `books-l2-tbt`, `books50-l2-tbt`, `books5`) map
    /// to `Book` — the venue treats them identically for our purposes.
    pub fn from_wire(name: &str) -> Option<Channel> {
        match name {
            "trades" => Some(Channel::Trades),
            "funding-rate" => Some(Channel::FundingRate),
            "mark-price" => Some(Channel::MarkPrice),
            "tickers" => Some(Channel::Ticker),
            "open-interest" => Some(Channel::OpenInterest),
            "index-tickers" => Some(Channel::IndexTicker),
            "liquidation-orders" => Some(Channel::Liquidation),
            "books" | "books-l2-tbt" | "books50-l2-tbt" | "books5" => Some(Channel::Book),
            _ => None,
        }
    }

    /// The canonical wire name used when building the subscribe payload.
    pub fn to_wire(self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::FundingRate => "funding-rate",
            Channel::MarkPrice => "mark-price",
            Channel::Ticker => "tickers",
            Channel::OpenInterest => "open-interest",
            Channel::IndexTicker => "index-tickers",
            Channel::Liquidation => "liquidation-orders",
            Channel::Book => "books",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscribeArg {
    pub channel: &'static str,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeFrame {
    pub op: &'static str,
    pub args: Vec<SubscribeArg>,
}

impl SubscribeFrame {
    pub fn new(channels: &[Channel], instruments: &[String]) -> Self {
        let args = channels
            .iter()
            .flat_map(|ch| {
                instruments.iter().map(move |inst| SubscribeArg {
                    channel: ch.to_wire(),
                    inst_id: inst.clone(),
                })
            })
            .collect();
        SubscribeFrame { op: "subscribe", args }
    }
}

#[derive(Debug, Deserialize)]
pub struct FrameArg {
    pub channel: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

/// A raw inbound data frame, before per-channel parsing.
#[derive(Debug, Deserialize)]
pub struct DataFrame {
    pub arg: Option<FrameArg>,
    pub action: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
    pub event: Option<String>,
    pub code: Option<String>,
}

impl DataFrame {
    /// `true` for subscribe acks / error frames: no `arg`, so nothing to
    /// demux on.
    pub fn is_control_frame(&self) -> bool {
        self.arg.is_none() || self.event.is_some() || self.code.is_some()
    }

    /// Snapshot unless explicitly marked as an incremental update — an
    /// absent or unrecognized `action` is conservatively treated as a
    /// snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.action.as_deref() != Some("update")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_wire_roundtrip() {
        for ch in [
            Channel::Trades,
            Channel::FundingRate,
            Channel::MarkPrice,
            Channel::Ticker,
            Channel::OpenInterest,
            Channel::IndexTicker,
            Channel::Liquidation,
            Channel::Book,
        ] {
            assert_eq!(Channel::from_wire(ch.to_wire()), Some(ch));
        }
    }

    #[test]
    fn book_family_all_map_to_book() {
        for name in ["books", "books-l2-tbt", "books50-l2-tbt", "books5"] {
            assert_eq!(Channel::from_wire(name), Some(Channel::Book));
        }
    }

    #[test]
    fn subscribe_frame_is_cartesian_product() {
        let f = SubscribeFrame::new(
            &[Channel::Trades, Channel::Book],
            &["BTC-USDT-SWAP".to_string(), "ETH-USDT-SWAP".to_string()],
        );
        assert_eq!(f.args.len(), 4);
    }
}
