use std::collections::HashMap;
use std::env;

/// Margin risk threshold tiers, in margin-level percent. A tier fires when
/// the recomputed level drops to or below its boundary.
#[derive(Debug, Clone)]
pub struct MarginThresholds {
    pub warning: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for MarginThresholds {
    fn default() -> Self {
        Self {
            warning: 150.0,
            high: 100.0,
            critical: 50.0,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite ledger path.
    pub db_path: String,
    /// Minimum absolute unrealized-profit delta (account currency) for an
    /// open trade to emit `trade_updated`. Smaller moves still persist but
    /// are not broadcast.
    pub update_threshold: f64,
    /// Margin alert tiers.
    pub margin_thresholds: MarginThresholds,
    /// Keepalive ping interval (seconds).
    pub ping_interval_secs: u64,
    /// Consecutive missed pings before a viewer connection is closed.
    pub max_missed_pings: u32,
    /// Upper bound for one ingestion call (milliseconds). A cycle that
    /// exceeds it commits nothing.
    pub ingest_timeout_ms: u64,
    /// Bridge API keys mapped to account ids. Key issuance lives in the
    /// external identity service; this map is the verification edge.
    pub bridge_keys: HashMap<String, i64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        // Parse bridge keys from BRIDGE_KEYS env var
        // Format: "key|account_id,key2|account_id2"
        let bridge_keys = env::var("BRIDGE_KEYS")
            .ok()
            .map(|s| Self::parse_bridge_keys(&s))
            .unwrap_or_default();

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3002),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "spyglass.db".to_string()),
            update_threshold: env::var("UPDATE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.01),
            margin_thresholds: MarginThresholds {
                warning: env::var("MARGIN_WARNING_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(150.0),
                high: env::var("MARGIN_HIGH_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100.0),
                critical: env::var("MARGIN_CRITICAL_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(50.0),
            },
            ping_interval_secs: env::var("PING_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_missed_pings: env::var("MAX_MISSED_PINGS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            ingest_timeout_ms: env::var("INGEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            bridge_keys,
        }
    }

    fn parse_bridge_keys(raw: &str) -> HashMap<String, i64> {
        raw.split(',')
            .filter_map(|entry| {
                let parts: Vec<&str> = entry.split('|').collect();
                if parts.len() == 2 {
                    let key = parts[0].trim();
                    let account_id: i64 = parts[1].trim().parse().ok()?;
                    if key.is_empty() {
                        return None;
                    }
                    Some((key.to_string(), account_id))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Resolve a bridge API key to its account id.
    pub fn account_for_key(&self, key: &str) -> Option<i64> {
        self.bridge_keys.get(key).copied()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bridge_keys() {
        let keys = Config::parse_bridge_keys("abc123|1001,def456|1002");

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.get("abc123"), Some(&1001));
        assert_eq!(keys.get("def456"), Some(&1002));
    }

    #[test]
    fn test_parse_bridge_keys_skips_malformed() {
        let keys = Config::parse_bridge_keys("abc|1001,broken,|1002,key|notanumber");

        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("abc"), Some(&1001));
    }

    #[test]
    fn test_margin_thresholds_default() {
        let tiers = MarginThresholds::default();

        assert_eq!(tiers.warning, 150.0);
        assert_eq!(tiers.high, 100.0);
        assert_eq!(tiers.critical, 50.0);
    }
}
