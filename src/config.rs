// =============================================================================
// Config Registry (C1) — immutable engine configuration, frozen after load
// =============================================================================
//
// Every tunable the engine consults — phase rules, volatility caps, quality
// boosts, gate thresholds, feed timeouts/TTLs/rate-limit budgets, and
// context-completeness rules — lives here. Unlike the teacher's
// `RuntimeConfig` (hot-reloadable, saved back to disk on every change), this
// registry is loaded once and frozen: there is no runtime mutation endpoint,
// matching the Non-goal that learning suggestions never auto-apply engine
// rules. The content-hash is a by-product of the one-time initializer.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

// =============================================================================
// Feed configuration
// =============================================================================

/// Per-provider timeout, cache TTL, and rate-limit budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub cache_ttl_ms: u64,
    #[serde(default)]
    pub per_day_budget: u32,
    #[serde(default)]
    pub per_minute_budget: u32,
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_feed_timeout_ms() -> u64 {
    600
}

/// Configuration for all three Market Context Builder providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_options_feed")]
    pub options: FeedConfig,
    #[serde(default = "default_analytics_feed")]
    pub analytics: FeedConfig,
    #[serde(default = "default_liquidity_feed")]
    pub liquidity: FeedConfig,
}

fn default_options_feed() -> FeedConfig {
    FeedConfig {
        timeout_ms: 600,
        cache_ttl_ms: 300_000,
        per_day_budget: 10_000,
        per_minute_budget: 60,
    }
}

fn default_analytics_feed() -> FeedConfig {
    FeedConfig {
        timeout_ms: 600,
        cache_ttl_ms: 300_000,
        per_day_budget: 800,
        per_minute_budget: 8,
    }
}

fn default_liquidity_feed() -> FeedConfig {
    FeedConfig {
        timeout_ms: 600,
        cache_ttl_ms: 60_000,
        per_day_budget: 200,
        per_minute_budget: 200,
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            options: default_options_feed(),
            analytics: default_analytics_feed(),
            liquidity: default_liquidity_feed(),
        }
    }
}

// =============================================================================
// Decision Engine thresholds
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionThresholds {
    #[serde(default = "default_execute_threshold")]
    pub execute_confidence: f64,
    #[serde(default = "default_wait_threshold")]
    pub wait_confidence: f64,
    #[serde(default = "default_min_ai_score")]
    pub min_ai_score: f64,
    #[serde(default = "default_ai_score_penalty")]
    pub ai_score_penalty: f64,
    #[serde(default = "default_alignment_bonus_threshold")]
    pub alignment_bonus_threshold_pct: f64,
    #[serde(default = "default_alignment_bonus")]
    pub alignment_bonus: f64,
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
    #[serde(default = "default_max_atr_spike")]
    pub max_atr_spike: f64,
    #[serde(default = "default_min_depth_score")]
    pub min_depth_score: f64,
}

fn default_execute_threshold() -> f64 {
    80.0
}
fn default_wait_threshold() -> f64 {
    60.0
}
fn default_min_ai_score() -> f64 {
    6.0
}
fn default_ai_score_penalty() -> f64 {
    0.5
}
fn default_alignment_bonus_threshold() -> f64 {
    70.0
}
fn default_alignment_bonus() -> f64 {
    1.1
}
fn default_max_spread_bps() -> f64 {
    12.0
}
fn default_max_atr_spike() -> f64 {
    3.0
}
fn default_min_depth_score() -> f64 {
    30.0
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            execute_confidence: default_execute_threshold(),
            wait_confidence: default_wait_threshold(),
            min_ai_score: default_min_ai_score(),
            ai_score_penalty: default_ai_score_penalty(),
            alignment_bonus_threshold_pct: default_alignment_bonus_threshold(),
            alignment_bonus: default_alignment_bonus(),
            max_spread_bps: default_max_spread_bps(),
            max_atr_spike: default_max_atr_spike(),
            min_depth_score: default_min_depth_score(),
        }
    }
}

// =============================================================================
// Context completeness rules
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessConfig {
    /// Maximum age (ms) before a section is considered expired.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: i64,
}

fn default_max_age_ms() -> i64 {
    5 * 60 * 1000
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
        }
    }
}

// =============================================================================
// Error handler / retry policy
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    50
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

// =============================================================================
// Top-level Config
// =============================================================================

/// Engine version string embedded in every decision packet / ledger entry.
pub const ENGINE_VERSION: &str = "confluence-1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub thresholds: DecisionThresholds,
    #[serde(default)]
    pub completeness: CompletenessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults (with a warning) when the file is absent or malformed.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(cfg) => {
                    info!(path = %path.display(), "config loaded");
                    cfg
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// SHA-256 content hash of the canonical JSON serialization. Computed
    /// once at freeze time; returned as part of `engineVersion` derivation.
    pub fn content_hash(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("Config serialization is infallible by construction");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

/// Freeze `config` as the process-wide immutable registry. May only succeed
/// once; subsequent calls are no-ops that return the already-frozen value.
pub fn freeze(config: Config) -> &'static Config {
    match GLOBAL_CONFIG.set(config) {
        Ok(()) => {}
        Err(_already_set) => {
            warn!("config registry already frozen; ignoring duplicate freeze() call");
        }
    }
    global()
}

/// Access the frozen, process-wide config registry.
///
/// # Panics
/// Panics if called before [`freeze`]. The orchestrator's bootstrap path
/// guarantees `freeze` runs before any request is served.
pub fn global() -> &'static Config {
    GLOBAL_CONFIG
        .get()
        .expect("config registry accessed before freeze() — bootstrap ordering bug")
}

/// Test-only helper: initialize the registry with defaults if not already
/// frozen, and return it. Safe to call repeatedly from parallel test threads.
#[cfg(test)]
pub fn test_config() -> &'static Config {
    if GLOBAL_CONFIG.get().is_none() {
        let _ = GLOBAL_CONFIG.set(Config::default());
    }
    global()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.thresholds.execute_confidence, 80.0);
        assert_eq!(cfg.thresholds.wait_confidence, 60.0);
        assert_eq!(cfg.thresholds.min_ai_score, 6.0);
        assert_eq!(cfg.completeness.max_age_ms, 5 * 60 * 1000);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.feeds.options.per_day_budget, 10_000);
        assert_eq!(cfg.feeds.analytics.per_minute_budget, 8);
        assert_eq!(cfg.feeds.liquidity.cache_ttl_ms, 60_000);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive_to_changes() {
        let cfg_a = Config::default();
        let cfg_b = Config::default();
        assert_eq!(cfg_a.content_hash(), cfg_b.content_hash());

        let mut cfg_c = Config::default();
        cfg_c.thresholds.execute_confidence = 90.0;
        assert_ne!(cfg_a.content_hash(), cfg_c.content_hash());
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/path/to/config.json");
        assert_eq!(cfg.thresholds.execute_confidence, 80.0);
    }

    #[test]
    fn load_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut written = Config::default();
        written.thresholds.execute_confidence = 82.5;
        std::fs::write(&path, serde_json::to_string(&written).unwrap()).unwrap();

        let loaded = Config::load(&path);
        assert_eq!(loaded.thresholds.execute_confidence, 82.5);
        assert_eq!(loaded.content_hash(), written.content_hash());
    }
}
