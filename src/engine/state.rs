//! 💾 Engine state persistence
//!
//! Auto-sell runtime state (per-wallet thresholds, trigger latches, MEV
//! params) survives restarts through a small JSON file. Startup precedence:
//! built-in defaults < saved file < environment variables actually set.
//!
//! Env wins only when the operator explicitly set the key; otherwise a
//! threshold adjusted at runtime would silently snap back to the default
//! on every restart.

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::EngineConfig;
use crate::engine::auto_sell::{MevParams, WalletSellConfig};

/// Everything the engine needs to pick up where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStateFile {
    pub auto_sell_enabled: bool,
    pub mev: MevParams,
    #[serde(default)]
    pub wallets: HashMap<String, WalletSellConfig>,
    #[serde(default)]
    pub front_run_detected: bool,
    #[serde(default)]
    pub saved_at_ms: u64,
}

impl EngineStateFile {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_sell_enabled: config.auto_sell_enabled,
            mev: MevParams::from_config(config),
            wallets: HashMap::new(),
            front_run_detected: false,
            saved_at_ms: 0,
        }
    }
}

/// Which engine keys the operator explicitly set in the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvOverrides {
    pub auto_sell_enabled: bool,
    pub confirmation_delay_ms: bool,
    pub launch_cooldown_ms: bool,
    pub front_run_window_ms: bool,
    pub front_run_threshold_sol: bool,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            auto_sell_enabled: env_present("AUTO_SELL_ENABLED"),
            confirmation_delay_ms: env_present("SELL_CONFIRMATION_DELAY_MS"),
            launch_cooldown_ms: env_present("LAUNCH_COOLDOWN_MS"),
            front_run_window_ms: env_present("FRONT_RUN_WINDOW_MS"),
            front_run_threshold_sol: env_present("FRONT_RUN_THRESHOLD_SOL"),
        }
    }
}

fn env_present(key: &str) -> bool {
    std::env::var(key).is_ok()
}

/// Merge saved state with config defaults and explicit env overrides.
/// `config` already holds the env value for any key that was set, so an
/// override just means the config copy beats the saved copy.
pub fn resolve_initial(
    config: &EngineConfig,
    saved: Option<EngineStateFile>,
    overrides: EnvOverrides,
) -> EngineStateFile {
    let defaults = EngineStateFile::from_config(config);
    let Some(mut state) = saved else {
        return defaults;
    };

    if overrides.auto_sell_enabled {
        state.auto_sell_enabled = defaults.auto_sell_enabled;
    }
    if overrides.confirmation_delay_ms {
        state.mev.confirmation_delay_ms = defaults.mev.confirmation_delay_ms;
    }
    if overrides.launch_cooldown_ms {
        state.mev.launch_cooldown_ms = defaults.mev.launch_cooldown_ms;
    }
    if overrides.front_run_window_ms {
        state.mev.front_run_window_ms = defaults.mev.front_run_window_ms;
    }
    if overrides.front_run_threshold_sol {
        state.mev.front_run_threshold_sol = defaults.mev.front_run_threshold_sol;
    }
    state
}

/// Load saved engine state. Missing file is a normal first run; a corrupt
/// file is logged and treated as absent rather than blocking startup.
pub async fn load(path: &Path) -> Option<EngineStateFile> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("⚠️ Could not read engine state {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_slice::<EngineStateFile>(&data) {
        Ok(state) => {
            info!(
                "📥 Engine state loaded from {} ({} wallet config(s))",
                path.display(),
                state.wallets.len()
            );
            Some(state)
        }
        Err(e) => {
            warn!(
                "⚠️ Engine state file {} is corrupt, starting fresh: {}",
                path.display(),
                e
            );
            None
        }
    }
}

pub async fn save(path: &Path, state: &EngineStateFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(path, data).await?;
    debug!("💾 Engine state saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::auto_sell::SellState;

    fn test_engine_config() -> EngineConfig {
        EngineConfig {
            auto_sell_enabled: true,
            default_threshold_sol: 0.0,
            confirmation_delay_ms: 1000,
            launch_cooldown_ms: 5000,
            front_run_window_ms: 3000,
            front_run_threshold_sol: 0.0,
        }
    }

    fn saved_state() -> EngineStateFile {
        let mut wallets = HashMap::new();
        wallets.insert(
            "W1".to_string(),
            WalletSellConfig {
                threshold_sol: 4.5,
                enabled: true,
                state: SellState::Triggered { at_ms: 1_700_000_000_000 },
                last_result: None,
            },
        );
        EngineStateFile {
            auto_sell_enabled: false,
            mev: MevParams {
                confirmation_delay_ms: 250,
                launch_cooldown_ms: 9000,
                front_run_window_ms: 2000,
                front_run_threshold_sol: 1.5,
            },
            wallets,
            front_run_detected: true,
            saved_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_resolve_without_saved_state_uses_config() {
        let resolved = resolve_initial(&test_engine_config(), None, EnvOverrides::default());
        assert!(resolved.auto_sell_enabled);
        assert_eq!(resolved.mev.confirmation_delay_ms, 1000);
        assert!(resolved.wallets.is_empty());
        assert!(!resolved.front_run_detected);
    }

    #[test]
    fn test_saved_state_beats_defaults() {
        let resolved = resolve_initial(
            &test_engine_config(),
            Some(saved_state()),
            EnvOverrides::default(),
        );
        assert!(!resolved.auto_sell_enabled);
        assert_eq!(resolved.mev.confirmation_delay_ms, 250);
        assert_eq!(resolved.mev.launch_cooldown_ms, 9000);
        assert_eq!(resolved.wallets["W1"].threshold_sol, 4.5);
        assert!(resolved.front_run_detected);
    }

    #[test]
    fn test_explicit_env_keys_beat_saved_state() {
        let overrides = EnvOverrides {
            auto_sell_enabled: true,
            confirmation_delay_ms: true,
            ..Default::default()
        };
        let resolved = resolve_initial(&test_engine_config(), Some(saved_state()), overrides);
        // Overridden keys come from config
        assert!(resolved.auto_sell_enabled);
        assert_eq!(resolved.mev.confirmation_delay_ms, 1000);
        // Untouched keys keep their saved values
        assert_eq!(resolved.mev.launch_cooldown_ms, 9000);
        assert_eq!(resolved.mev.front_run_threshold_sol, 1.5);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let path = std::env::temp_dir().join("engine_state_roundtrip.json");
        let _ = tokio::fs::remove_file(&path).await;

        let state = saved_state();
        save(&path, &state).await.unwrap();

        let loaded = load(&path).await.expect("state file should load");
        assert_eq!(loaded.auto_sell_enabled, state.auto_sell_enabled);
        assert_eq!(loaded.mev, state.mev);
        assert_eq!(loaded.wallets.len(), 1);
        assert!(loaded.wallets["W1"].state.is_triggered());
        assert!(loaded.front_run_detected);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let path = std::env::temp_dir().join("engine_state_does_not_exist.json");
        let _ = tokio::fs::remove_file(&path).await;
        assert!(load(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_none() {
        let path = std::env::temp_dir().join("engine_state_corrupt.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(load(&path).await.is_none());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
