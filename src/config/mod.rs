//! Static startup configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::warn;

/// Everything the monitor needs, fixed at startup. Every field can be
/// overridden through a `FERRET_`-prefixed environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// HTTP RPC endpoint for point lookups
    pub rpc_url: String,
    /// WebSocket RPC endpoint for the log subscription
    pub ws_url: String,
    /// The single token mint being watched
    pub tracked_mint: String,
    /// Recent-signature window size per wallet
    pub history_cap: usize,
    /// Minimum SOL balance for a detection
    pub min_sol_balance: f64,
    /// Maximum wallet age in days
    pub max_account_age_days: i64,
    /// Maximum candidates dispatched per second
    pub max_txns_per_second: u32,
    /// Dispatcher tick period in milliseconds
    pub dispatch_tick_ms: u64,
    /// Maximum concurrently outstanding pipeline runs
    pub max_inflight_pipelines: usize,
    /// Per-lookup RPC timeout in seconds
    pub rpc_timeout_secs: u64,
    /// Listen address for the query endpoint
    pub listen_addr: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com/".to_string(),
            tracked_mint: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".to_string(),
            history_cap: 10,
            min_sol_balance: 0.01,
            max_account_age_days: 7,
            max_txns_per_second: 3,
            dispatch_tick_ms: 100,
            max_inflight_pipelines: 4,
            rpc_timeout_secs: 10,
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Loads defaults, then applies any `FERRET_*` environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rpc_url: env_string("FERRET_RPC_URL", defaults.rpc_url),
            ws_url: env_string("FERRET_WS_URL", defaults.ws_url),
            tracked_mint: env_string("FERRET_TRACKED_MINT", defaults.tracked_mint),
            history_cap: env_parsed("FERRET_HISTORY_CAP", defaults.history_cap),
            min_sol_balance: env_parsed("FERRET_MIN_SOL_BALANCE", defaults.min_sol_balance),
            max_account_age_days: env_parsed(
                "FERRET_MAX_ACCOUNT_AGE_DAYS",
                defaults.max_account_age_days,
            ),
            max_txns_per_second: env_parsed(
                "FERRET_MAX_TXNS_PER_SECOND",
                defaults.max_txns_per_second,
            ),
            dispatch_tick_ms: env_parsed("FERRET_DISPATCH_TICK_MS", defaults.dispatch_tick_ms),
            max_inflight_pipelines: env_parsed(
                "FERRET_MAX_INFLIGHT_PIPELINES",
                defaults.max_inflight_pipelines,
            ),
            rpc_timeout_secs: env_parsed("FERRET_RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs),
            listen_addr: env_string("FERRET_LISTEN_ADDR", defaults.listen_addr),
        }
    }

    /// Queue capacity: twice the dispatch rate, so a one-second stall
    /// is absorbed before shedding starts.
    pub fn queue_capacity(&self) -> usize {
        2 * self.max_txns_per_second as usize
    }

    pub fn max_account_age_secs(&self) -> i64 {
        self.max_account_age_days * 24 * 60 * 60
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw = %raw, "Unparseable environment override, keeping default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = MonitorConfig::default();
        assert_eq!(config.history_cap, 10);
        assert_eq!(config.min_sol_balance, 0.01);
        assert_eq!(config.max_account_age_days, 7);
        assert_eq!(config.max_txns_per_second, 3);
    }

    #[test]
    fn queue_capacity_is_twice_the_rate() {
        let config = MonitorConfig {
            max_txns_per_second: 5,
            ..Default::default()
        };
        assert_eq!(config.queue_capacity(), 10);
    }

    #[test]
    fn account_age_converts_to_seconds() {
        let config = MonitorConfig::default();
        assert_eq!(config.max_account_age_secs(), 7 * 86_400);
    }
}
