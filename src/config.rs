//! Environment-driven configuration, loaded once at startup.

use crate::error::IngestError;
use crate::frame::Channel;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            v.split(',').map(|s| s.trim().to_string()).collect()
        }
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub instruments: Vec<String>,
    pub channels: Vec<Channel>,
    pub batch_max_size: usize,
    pub flush_interval_ms: u64,
    pub snapshot_interval_sec: u64,
    pub orderbook_max_depth: usize,
    pub backoff_base_secs: f64,
    pub backoff_cap_secs: f64,
    pub metrics_port: u16,
    pub log_level: String,
    pub sqlite_path: String,
}

impl Config {
    /// Parse configuration from the process environment, falling back to
    /// the documented default for every missing or unparsable value.
    pub fn from_env() -> Result<Self, IngestError> {
        let instruments = env_csv("INSTRUMENTS", &["BTC-USDT-SWAP", "ETH-USDT-SWAP"]);

        let channel_names = env_csv(
            "CHANNELS",
            &[
                "trades",
                "funding-rate",
                "mark-price",
                "tickers",
                "open-interest",
                "index-tickers",
                "liquidation-orders",
                "books",
            ],
        );
        let mut channels = Vec::with_capacity(channel_names.len());
        for name in &channel_names {
            match Channel::from_wire(name) {
                Some(ch) => channels.push(ch),
                None => {
                    return Err(IngestError::Config(format!(
                        "unknown channel in CHANNELS: {name}"
                    )))
                }
            }
        }

        Ok(Config {
            ws_url: std::env::var("WS_URL")
                .unwrap_or_else(|_| "wss://ws.okx.com:8443/ws/v5/public".to_string()),
            instruments,
            channels,
            batch_max_size: env_or("BATCH_MAX_SIZE", 5000),
            flush_interval_ms: env_or("FLUSH_INTERVAL_MS", 5000),
            snapshot_interval_sec: env_or("SNAPSHOT_INTERVAL_SEC", 30),
            orderbook_max_depth: env_or("ORDERBOOK_MAX_DEPTH", 50),
            backoff_base_secs: env_or("BACKOFF_BASE", 0.5),
            backoff_cap_secs: env_or("BACKOFF_CAP", 30.0),
            metrics_port: env_or("METRICS_PORT", 9108),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH")
                .unwrap_or_else(|_| "./okx_ingestor.sqlite3".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // Only safe to assert on vars this test doesn't touch; instruments/
        // channels default list is independent of the environment entirely
        // when unset, which is the common CI case.
        let instruments = env_csv("OKX_INGESTOR_TEST_UNSET_VAR", &["BTC-USDT-SWAP"]);
        assert_eq!(instruments, vec!["BTC-USDT-SWAP".to_string()]);
    }

    #[test]
    fn csv_parses_multiple() {
        std::env::set_var("OKX_INGESTOR_TEST_CSV", "a, b,c");
        let parsed = env_csv("OKX_INGESTOR_TEST_CSV", &["x"]);
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        std::env::remove_var("OKX_INGESTOR_TEST_CSV");
    }
}
