//! Configuration management for the trade tracker service
//!
//! Loads configuration from environment variables (via .env file) and provides
//! validated, type-safe access to all service parameters.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::types::WalletRole;

/// Complete configuration for the trade tracker service
#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub launch: LaunchConfig,
    pub tracker: TrackerConfig,
    pub engine: EngineConfig,
    pub fees: FeeConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Upstream websocket feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Websocket endpoint delivering trade events
    pub endpoint: String,
    /// Ping interval (seconds)
    pub heartbeat_interval_secs: u64,
    /// First reconnect delay (milliseconds)
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap (milliseconds)
    pub reconnect_max_delay_ms: u64,
}

/// Optional launch bootstrap: token + owned wallets to track at startup
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Token mint to track immediately (empty = wait for a track command)
    pub mint: Option<String>,
    pub funding_wallet: Option<String>,
    pub creator_wallet: Option<String>,
    pub bundle_wallets: Vec<String>,
    pub holder_wallets: Vec<String>,
}

/// Ingestion path tuning
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// In-memory trade history depth per token (newest kept)
    pub history_limit: usize,
    /// Dedup index size that triggers eviction
    pub dedup_max_entries: usize,
    /// Off-token dedup entries kept after an eviction pass
    pub dedup_retained_tail: usize,
}

/// Auto-sell engine defaults (runtime state may override via saved state file)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch for threshold-triggered selling
    pub auto_sell_enabled: bool,
    /// Threshold applied to every owned wallet at track time (0 = unarmed)
    pub default_threshold_sol: f64,
    /// Delay between trigger and sell dispatch (milliseconds, 0 = immediate)
    pub confirmation_delay_ms: u64,
    /// Quiet period after the first external trade (milliseconds)
    pub launch_cooldown_ms: u64,
    /// Sliding window for front-run detection (milliseconds)
    pub front_run_window_ms: u64,
    /// Gross external buy volume that latches the front-run guard (0 = disabled)
    pub front_run_threshold_sol: f64,
}

/// Fee model used for per-wallet P&L accounting
#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// Trading fee as a fraction of SOL moved, charged on both legs
    pub trading_fee_pct: f64,
    /// Flat network fee per transaction (SOL)
    pub network_fee_sol: f64,
    /// Network fee for creator-wallet transactions (SOL)
    pub creator_network_fee_sol: f64,
    /// One-time token account rent charged on a wallet's first buy (SOL)
    pub account_rent_sol: f64,
}

impl FeeConfig {
    /// Flat per-transaction fee for a wallet of the given role
    pub fn network_fee_for(&self, role: WalletRole) -> f64 {
        match role {
            WalletRole::Creator => self.creator_network_fee_sol,
            _ => self.network_fee_sol,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite path for the trade history database
    pub sqlite_path: PathBuf,
    /// JSON file holding engine runtime state across restarts
    pub engine_state_path: PathBuf,
}

/// HTTP server (SSE stream + metrics + health) configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Path to the trigger decision CSV file
    pub trigger_log_path: PathBuf,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Expects a .env file in the working directory or environment variables to be set.
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (ignoring error if not found)
        let _ = dotenv::dotenv();

        Ok(Config {
            feed: FeedConfig {
                endpoint: get_env_string("FEED_URL", "wss://pumpportal.fun/api/data")?,
                heartbeat_interval_secs: get_env_u64("FEED_HEARTBEAT_SECS", 30)?,
                reconnect_base_delay_ms: get_env_u64("FEED_RECONNECT_BASE_MS", 2000)?,
                reconnect_max_delay_ms: get_env_u64("FEED_RECONNECT_MAX_MS", 60000)?,
            },
            launch: LaunchConfig {
                mint: env::var("TRACK_MINT").ok().filter(|s| !s.is_empty()),
                funding_wallet: env::var("FUNDING_WALLET").ok().filter(|s| !s.is_empty()),
                creator_wallet: env::var("CREATOR_WALLET").ok().filter(|s| !s.is_empty()),
                bundle_wallets: get_env_list("BUNDLE_WALLETS"),
                holder_wallets: get_env_list("HOLDER_WALLETS"),
            },
            tracker: TrackerConfig {
                history_limit: get_env_usize("HISTORY_LIMIT", 2000)?,
                dedup_max_entries: get_env_usize("DEDUP_MAX_ENTRIES", 10000)?,
                dedup_retained_tail: get_env_usize("DEDUP_RETAINED_TAIL", 1000)?,
            },
            engine: EngineConfig {
                auto_sell_enabled: get_env_bool("AUTO_SELL_ENABLED", true)?,
                default_threshold_sol: get_env_f64("DEFAULT_SELL_THRESHOLD_SOL", 0.0)?,
                confirmation_delay_ms: get_env_u64("SELL_CONFIRMATION_DELAY_MS", 1000)?,
                launch_cooldown_ms: get_env_u64("LAUNCH_COOLDOWN_MS", 5000)?,
                front_run_window_ms: get_env_u64("FRONT_RUN_WINDOW_MS", 3000)?,
                front_run_threshold_sol: get_env_f64("FRONT_RUN_THRESHOLD_SOL", 0.0)?,
            },
            fees: FeeConfig {
                trading_fee_pct: get_env_f64("TRADING_FEE_PCT", 0.01)?,
                network_fee_sol: get_env_f64("NETWORK_FEE_SOL", 0.000005)?,
                creator_network_fee_sol: get_env_f64("CREATOR_NETWORK_FEE_SOL", 0.00001)?,
                account_rent_sol: get_env_f64("ACCOUNT_RENT_SOL", 0.002)?,
            },
            storage: StorageConfig {
                sqlite_path: PathBuf::from(get_env_string("SQLITE_PATH", "./data/trade_tracker.db")?),
                engine_state_path: PathBuf::from(get_env_string(
                    "ENGINE_STATE_PATH",
                    "./data/engine_state.json",
                )?),
            },
            server: ServerConfig {
                bind_address: get_env_string("SERVER_BIND_ADDRESS", "0.0.0.0")?,
                port: get_env_u16("SERVER_PORT", 9091)?,
            },
            logging: LoggingConfig {
                trigger_log_path: PathBuf::from(get_env_string(
                    "TRIGGER_LOG_PATH",
                    "./data/trigger_log.csv",
                )?),
                log_level: get_env_string("LOG_LEVEL", "info")?,
            },
        })
    }

    /// Validate configuration values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        // Feed
        let parsed = url::Url::parse(&self.feed.endpoint).context("Invalid FEED_URL")?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => anyhow::bail!("FEED_URL scheme must be ws or wss, got {}", other),
        }
        if self.feed.heartbeat_interval_secs == 0 {
            anyhow::bail!("FEED_HEARTBEAT_SECS must be > 0");
        }
        if self.feed.reconnect_base_delay_ms == 0 {
            anyhow::bail!("FEED_RECONNECT_BASE_MS must be > 0");
        }
        if self.feed.reconnect_max_delay_ms < self.feed.reconnect_base_delay_ms {
            anyhow::bail!("FEED_RECONNECT_MAX_MS must be ≥ FEED_RECONNECT_BASE_MS");
        }

        // Tracker
        if self.tracker.history_limit == 0 {
            anyhow::bail!("HISTORY_LIMIT must be > 0");
        }
        if self.tracker.dedup_max_entries == 0 {
            anyhow::bail!("DEDUP_MAX_ENTRIES must be > 0");
        }
        if self.tracker.dedup_retained_tail >= self.tracker.dedup_max_entries {
            anyhow::bail!("DEDUP_RETAINED_TAIL must be < DEDUP_MAX_ENTRIES");
        }

        // Engine
        if self.engine.default_threshold_sol < 0.0 {
            anyhow::bail!("DEFAULT_SELL_THRESHOLD_SOL must be ≥ 0");
        }
        if self.engine.front_run_threshold_sol < 0.0 {
            anyhow::bail!("FRONT_RUN_THRESHOLD_SOL must be ≥ 0");
        }
        if self.engine.front_run_window_ms == 0 {
            anyhow::bail!("FRONT_RUN_WINDOW_MS must be > 0");
        }

        // Fees
        if self.fees.trading_fee_pct < 0.0 || self.fees.trading_fee_pct > 1.0 {
            anyhow::bail!("TRADING_FEE_PCT must be between 0.0 and 1.0");
        }
        if self.fees.network_fee_sol < 0.0 || self.fees.creator_network_fee_sol < 0.0 {
            anyhow::bail!("network fees must be ≥ 0");
        }
        if self.fees.account_rent_sol < 0.0 {
            anyhow::bail!("ACCOUNT_RENT_SOL must be ≥ 0");
        }

        // Server
        if self.server.port == 0 {
            anyhow::bail!("SERVER_PORT must be > 0");
        }

        // Launch bootstrap: wallets without a mint can never be classified
        if self.launch.mint.is_none()
            && (!self.launch.bundle_wallets.is_empty() || !self.launch.holder_wallets.is_empty())
        {
            log::warn!("⚠️ Owned wallets configured without TRACK_MINT - they are ignored until a track command arrives");
        }

        Ok(())
    }
}

// Helper functions for environment variable parsing

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn get_env_u16(key: &str, default: u16) -> Result<u16> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("Invalid {} value: {}", key, raw),
        },
        Err(_) => Ok(default),
    }
}

/// Comma-separated list env var; missing or empty yields an empty vec
fn get_env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
