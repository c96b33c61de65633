//! 🎯 Auto-sell engine
//!
//! Watches net external volume and exits owned positions when buyers have
//! put enough SOL in:
//! - per-wallet one-shot state machine: Idle → PendingConfirmation → Triggered
//! - confirmation timers are real tasks with abort handles, never polls
//! - timer callbacks re-validate volume before any sell is dispatched
//! - launch cooldown defers evaluation with a single re-check timer
//! - a front-run guard latches when the buy window looks like MEV pressure
//!
//! The engine runs on the tracker's processing path; spawned timers talk
//! back through `EngineEvent`s so every state change happens on that one
//! path. Actual transaction submission lives behind the `SellExecutor`
//! trait.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Duration;

use crate::config::EngineConfig;
use crate::engine::logging::{TriggerEvent, TriggerLogEntry, TriggerLogger};
use crate::metrics;

/// Sell capability seam. The tracker decides WHEN to sell; implementations
/// decide HOW (wallet keys, transaction building, submission).
#[async_trait]
pub trait SellExecutor: Send + Sync {
    /// Market-sell `wallet`'s position in `mint`. Returns a receipt
    /// (transaction signature or similar) on success.
    async fn execute_sell(&self, mint: &str, wallet: &str) -> Result<String>;
}

/// Default executor for the shipped binary: logs the intent and reports
/// success without touching the chain.
pub struct DryRunExecutor;

#[async_trait]
impl SellExecutor for DryRunExecutor {
    async fn execute_sell(&self, mint: &str, wallet: &str) -> Result<String> {
        info!("🧪 DRY RUN sell: wallet {} exits {}", short(wallet), short(mint));
        Ok(format!("dry-run-{}", chrono::Utc::now().timestamp_millis()))
    }
}

/// Timing and MEV parameters, adjustable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MevParams {
    pub confirmation_delay_ms: u64,
    pub launch_cooldown_ms: u64,
    pub front_run_window_ms: u64,
    pub front_run_threshold_sol: f64,
}

impl MevParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            confirmation_delay_ms: config.confirmation_delay_ms,
            launch_cooldown_ms: config.launch_cooldown_ms,
            front_run_window_ms: config.front_run_window_ms,
            front_run_threshold_sol: config.front_run_threshold_sol,
        }
    }
}

/// Per-wallet sell lifecycle. Triggered is one-shot: only a reset returns
/// a wallet to Idle afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SellState {
    Idle,
    PendingConfirmation { armed_at_ms: u64 },
    Triggered { at_ms: u64 },
}

impl SellState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SellState::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SellState::PendingConfirmation { .. })
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, SellState::Triggered { .. })
    }
}

/// Outcome of the most recent sell dispatch for a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellResult {
    pub ok: bool,
    pub detail: String,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSellConfig {
    pub threshold_sol: f64,
    pub enabled: bool,
    pub state: SellState,
    pub last_result: Option<SellResult>,
}

impl WalletSellConfig {
    fn with_threshold(threshold_sol: f64) -> Self {
        Self {
            threshold_sol,
            enabled: true,
            state: SellState::Idle,
            last_result: None,
        }
    }

    /// Can this wallet start a new trigger cycle right now?
    pub fn armed(&self) -> bool {
        self.enabled && self.threshold_sol > 0.0 && self.state.is_idle()
    }
}

/// Events spawned timers and sell tasks send back into the processing loop.
#[derive(Debug)]
pub enum EngineEvent {
    ConfirmSell { mint: String, wallet: String },
    CooldownRecheck { mint: String },
    SellFinished {
        mint: String,
        wallet: String,
        outcome: Result<String, String>,
    },
}

pub struct AutoSellEngine {
    enabled: bool,
    mev: MevParams,
    wallets: HashMap<String, WalletSellConfig>,
    /// wallet -> pending confirmation timer
    pending_timers: HashMap<String, AbortHandle>,
    /// at most one cooldown re-check timer per tracked mint
    cooldown_timer: Option<(String, AbortHandle)>,
    front_run: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<EngineEvent>,
    executor: Arc<dyn SellExecutor>,
    logger: Arc<TriggerLogger>,
    dirty: bool,
}

impl AutoSellEngine {
    pub fn new(
        enabled: bool,
        mev: MevParams,
        executor: Arc<dyn SellExecutor>,
        logger: Arc<TriggerLogger>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            enabled,
            mev,
            wallets: HashMap::new(),
            pending_timers: HashMap::new(),
            cooldown_timer: None,
            front_run: Arc::new(AtomicBool::new(false)),
            events,
            executor,
            logger,
            dirty: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn mev(&self) -> &MevParams {
        &self.mev
    }

    /// Shared latch, readable from any task without locking.
    pub fn front_run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.front_run)
    }

    pub fn is_front_run_detected(&self) -> bool {
        self.front_run.load(Ordering::Relaxed)
    }

    pub fn wallet_config(&self, wallet: &str) -> Option<&WalletSellConfig> {
        self.wallets.get(wallet)
    }

    pub fn wallet_configs(&self) -> &HashMap<String, WalletSellConfig> {
        &self.wallets
    }

    /// True once after any state mutation; used to debounce persistence.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Install the wallet set for a launch. Existing configs for surviving
    /// addresses are kept (restart restore beats defaults); new addresses
    /// get the default threshold; dropped addresses lose their timers.
    pub fn install_wallets(&mut self, wallets: &[String], default_threshold_sol: f64) {
        let keep: std::collections::HashSet<&String> = wallets.iter().collect();

        let dropped: Vec<String> = self
            .wallets
            .keys()
            .filter(|w| !keep.contains(w))
            .cloned()
            .collect();
        for wallet in dropped {
            self.cancel_pending_timer(&wallet);
            self.wallets.remove(&wallet);
        }

        for wallet in wallets {
            self.wallets
                .entry(wallet.clone())
                .or_insert_with(|| WalletSellConfig::with_threshold(default_threshold_sol));
        }

        let armed = self.wallets.values().filter(|c| c.armed()).count();
        info!("🎯 Engine wallets installed: {} total, {} armed", self.wallets.len(), armed);
        self.dirty = true;
    }

    /// Restore runtime state saved by a previous run.
    pub fn restore(
        &mut self,
        enabled: bool,
        mev: MevParams,
        wallets: HashMap<String, WalletSellConfig>,
        front_run_detected: bool,
    ) {
        self.enabled = enabled;
        self.mev = mev;
        self.front_run.store(front_run_detected, Ordering::Relaxed);
        // A restored PendingConfirmation has lost its timer; re-arm from
        // scratch instead of promising a confirmation that never comes.
        self.wallets = wallets
            .into_iter()
            .map(|(addr, mut cfg)| {
                if cfg.state.is_pending() {
                    cfg.state = SellState::Idle;
                }
                (addr, cfg)
            })
            .collect();
        info!(
            "🎯 Engine state restored: enabled={}, {} wallet config(s)",
            self.enabled,
            self.wallets.len()
        );
    }

    pub fn set_enabled(&mut self, enabled: bool, mint: &str, net_sol: f64, now_ms: u64) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.dirty = true;

        if enabled {
            info!("🟢 Auto-sell enabled");
            return;
        }

        // Disabling cancels every pending confirmation
        let pending: Vec<String> = self
            .wallets
            .iter()
            .filter(|(_, c)| c.state.is_pending())
            .map(|(w, _)| w.clone())
            .collect();
        for wallet in &pending {
            self.cancel_pending_timer(wallet);
            if let Some(cfg) = self.wallets.get_mut(wallet) {
                cfg.state = SellState::Idle;
            }
        }
        info!("⚫ Auto-sell disabled ({} pending sell(s) cancelled)", pending.len());
        self.log_event(TriggerEvent::Disabled, mint, "", 0.0, net_sol, now_ms, format!("{} pending cancelled", pending.len()));
    }

    pub fn set_mev_params(&mut self, params: MevParams) {
        info!(
            "🛡️ MEV params updated: delay={}ms cooldown={}ms window={}ms front_run_threshold={:.4} SOL",
            params.confirmation_delay_ms,
            params.launch_cooldown_ms,
            params.front_run_window_ms,
            params.front_run_threshold_sol
        );
        self.mev = params;
        self.dirty = true;
    }

    /// Upsert a wallet's threshold. Disarming a pending wallet cancels its
    /// timer; a triggered wallet stays latched until reset.
    pub fn set_wallet_threshold(
        &mut self,
        wallet: &str,
        threshold_sol: f64,
        enabled: bool,
        mint: &str,
        net_sol: f64,
        now_ms: u64,
    ) {
        let cfg = self
            .wallets
            .entry(wallet.to_string())
            .or_insert_with(|| WalletSellConfig::with_threshold(threshold_sol));
        cfg.threshold_sol = threshold_sol;
        cfg.enabled = enabled;

        let disarmed = !enabled || threshold_sol <= 0.0;
        if disarmed && cfg.state.is_pending() {
            cfg.state = SellState::Idle;
            self.cancel_pending_timer(wallet);
            metrics::record_sell_cancelled();
            self.log_event(
                TriggerEvent::Cancelled,
                mint,
                wallet,
                threshold_sol,
                net_sol,
                now_ms,
                "disarmed while pending".to_string(),
            );
        }
        info!(
            "🎯 Wallet {} threshold set: {:.4} SOL (enabled: {})",
            short(wallet),
            threshold_sol,
            enabled
        );
        self.dirty = true;
    }

    /// Run the trigger checks after an external volume change (or a
    /// cooldown re-check). Fires at most once per wallet per launch.
    pub fn evaluate(&mut self, mint: &str, net_sol: f64, first_trade_ms: Option<u64>, now_ms: u64) {
        if !self.enabled {
            return;
        }

        let candidates: Vec<(String, f64)> = self
            .wallets
            .iter()
            .filter(|(_, c)| c.armed() && net_sol >= c.threshold_sol)
            .map(|(w, c)| (w.clone(), c.threshold_sol))
            .collect();
        if candidates.is_empty() {
            return;
        }

        // Launch cooldown: a quiet period measured from the first external
        // trade. Not elapsed yet means one re-check timer, not a poll loop.
        if let Some(first_ms) = first_trade_ms {
            let cooldown_end = first_ms.saturating_add(self.mev.launch_cooldown_ms);
            if now_ms < cooldown_end {
                let remaining = cooldown_end - now_ms;
                if self.cooldown_timer.is_none() {
                    self.spawn_cooldown_timer(mint, remaining);
                    self.log_event(
                        TriggerEvent::CooldownDeferred,
                        mint,
                        "",
                        0.0,
                        net_sol,
                        now_ms,
                        format!("{}ms remaining", remaining),
                    );
                    debug!("⏳ Cooldown active for {}, re-check in {}ms", short(mint), remaining);
                }
                return;
            }
        }

        for (wallet, threshold) in candidates {
            self.arm_wallet(mint, &wallet, threshold, net_sol, now_ms);
        }
    }

    fn arm_wallet(&mut self, mint: &str, wallet: &str, threshold: f64, net_sol: f64, now_ms: u64) {
        if self.mev.confirmation_delay_ms == 0 {
            self.trigger_now(mint, wallet, threshold, net_sol, now_ms);
            return;
        }

        if let Some(cfg) = self.wallets.get_mut(wallet) {
            cfg.state = SellState::PendingConfirmation { armed_at_ms: now_ms };
        }
        self.spawn_confirmation_timer(mint, wallet, Duration::from_millis(self.mev.confirmation_delay_ms));
        info!(
            "🟡 {} armed: net {:.4} SOL >= {:.4} SOL, confirming in {}ms",
            short(wallet),
            net_sol,
            threshold,
            self.mev.confirmation_delay_ms
        );
        self.log_event(
            TriggerEvent::Armed,
            mint,
            wallet,
            threshold,
            net_sol,
            now_ms,
            format!("confirm in {}ms", self.mev.confirmation_delay_ms),
        );
        self.dirty = true;
    }

    /// Confirmation timer fired: re-validate against live volume before
    /// anything irreversible happens.
    pub fn confirm_sell(&mut self, mint: &str, wallet: &str, net_sol: f64, now_ms: u64) {
        self.pending_timers.remove(wallet);

        let Some(cfg) = self.wallets.get(wallet) else {
            debug!("Confirmation for unknown wallet {}, ignoring", short(wallet));
            return;
        };
        if !cfg.state.is_pending() {
            debug!("Confirmation for {} in state {:?}, ignoring", short(wallet), cfg.state);
            return;
        }

        let threshold = cfg.threshold_sol;
        let still_valid = self.enabled && cfg.enabled && net_sol >= threshold;
        if still_valid {
            self.trigger_now(mint, wallet, threshold, net_sol, now_ms);
            return;
        }

        if let Some(cfg) = self.wallets.get_mut(wallet) {
            cfg.state = SellState::Idle;
        }
        metrics::record_sell_cancelled();
        info!(
            "🚫 {} sell cancelled: net {:.4} SOL < {:.4} SOL after delay",
            short(wallet),
            net_sol,
            threshold
        );
        self.log_event(
            TriggerEvent::Cancelled,
            mint,
            wallet,
            threshold,
            net_sol,
            now_ms,
            format!("net {:.4} below threshold after delay", net_sol),
        );
        self.dirty = true;
    }

    fn trigger_now(&mut self, mint: &str, wallet: &str, threshold: f64, net_sol: f64, now_ms: u64) {
        if let Some(cfg) = self.wallets.get_mut(wallet) {
            cfg.state = SellState::Triggered { at_ms: now_ms };
        }
        metrics::record_sell_triggered();
        info!(
            "🟢 {} TRIGGERED: net {:.4} SOL >= {:.4} SOL, dispatching sell",
            short(wallet),
            net_sol,
            threshold
        );
        self.log_event(
            TriggerEvent::Triggered,
            mint,
            wallet,
            threshold,
            net_sol,
            now_ms,
            format!("net {:.4} >= {:.4}", net_sol, threshold),
        );
        self.dispatch_sell(mint, wallet);
        self.dirty = true;
    }

    /// Run the executor in its own task so ingestion never waits on a
    /// transaction; the outcome comes back as a `SellFinished` event.
    fn dispatch_sell(&self, mint: &str, wallet: &str) {
        let executor = Arc::clone(&self.executor);
        let events = self.events.clone();
        let mint = mint.to_string();
        let wallet = wallet.to_string();
        tokio::spawn(async move {
            let outcome = executor
                .execute_sell(&mint, &wallet)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(EngineEvent::SellFinished { mint, wallet, outcome });
        });
    }

    /// The sell task finished; record the outcome. The wallet stays
    /// Triggered either way, failed sells are visible and retried only by
    /// an operator.
    pub fn sell_finished(
        &mut self,
        mint: &str,
        wallet: &str,
        outcome: Result<String, String>,
        now_ms: u64,
    ) {
        let (ok, detail) = match outcome {
            Ok(receipt) => {
                info!("✅ Sell completed for {}: {}", short(wallet), receipt);
                (true, receipt)
            }
            Err(err) => {
                warn!("❌ Sell FAILED for {}: {}", short(wallet), err);
                (false, err)
            }
        };

        let threshold = self.wallets.get(wallet).map_or(0.0, |c| c.threshold_sol);
        if let Some(cfg) = self.wallets.get_mut(wallet) {
            cfg.last_result = Some(SellResult {
                ok,
                detail: detail.clone(),
                at_ms: now_ms,
            });
        }
        metrics::record_sell_result(ok);
        self.log_event(
            if ok { TriggerEvent::SellOk } else { TriggerEvent::SellFailed },
            mint,
            wallet,
            threshold,
            0.0,
            now_ms,
            detail,
        );
        self.dirty = true;
    }

    /// External buy landed in the front-run window; latch when the gross
    /// buy pressure crosses the guard threshold. Synchronous, no timer.
    pub fn on_external_buy(&mut self, mint: &str, gross_buy_sol: f64, now_ms: u64) {
        if self.mev.front_run_threshold_sol <= 0.0 {
            return;
        }
        if self.front_run.load(Ordering::Relaxed) {
            return;
        }
        if gross_buy_sol >= self.mev.front_run_threshold_sol {
            self.front_run.store(true, Ordering::Relaxed);
            metrics::record_front_run_detection();
            warn!(
                "🚨 Front-run pressure on {}: {:.4} SOL bought within {}ms window",
                short(mint),
                gross_buy_sol,
                self.mev.front_run_window_ms
            );
            self.log_event(
                TriggerEvent::FrontRun,
                mint,
                "",
                self.mev.front_run_threshold_sol,
                gross_buy_sol,
                now_ms,
                format!("window {}ms", self.mev.front_run_window_ms),
            );
            self.dirty = true;
        }
    }

    /// The cooldown re-check timer fired; the caller re-evaluates with
    /// fresh volume right after.
    pub fn cooldown_recheck_fired(&mut self, mint: &str) {
        if let Some((armed_mint, _)) = &self.cooldown_timer {
            if armed_mint == mint {
                self.cooldown_timer = None;
            }
        }
    }

    /// Return to the pre-launch state: every timer cancelled, every latch
    /// cleared, thresholds kept. All-or-nothing.
    pub fn reset(&mut self, mint: &str, now_ms: u64) {
        for (_, handle) in self.pending_timers.drain() {
            handle.abort();
        }
        if let Some((_, handle)) = self.cooldown_timer.take() {
            handle.abort();
        }
        for cfg in self.wallets.values_mut() {
            cfg.state = SellState::Idle;
            cfg.last_result = None;
        }
        self.front_run.store(false, Ordering::Relaxed);
        info!("🧹 Engine reset for {}", short(mint));
        self.log_event(TriggerEvent::Reset, mint, "", 0.0, 0.0, now_ms, String::new());
        self.dirty = true;
    }

    /// Untrack: drop everything including wallet configs.
    pub fn clear(&mut self, mint: &str, now_ms: u64) {
        self.reset(mint, now_ms);
        self.wallets.clear();
        self.dirty = true;
    }

    fn spawn_confirmation_timer(&mut self, mint: &str, wallet: &str, delay: Duration) {
        let events = self.events.clone();
        let mint = mint.to_string();
        let wallet_key = wallet.to_string();
        let wallet = wallet_key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::ConfirmSell { mint, wallet });
        });
        // Re-arming a wallet replaces its old timer
        if let Some(old) = self.pending_timers.insert(wallet_key, handle.abort_handle()) {
            old.abort();
        }
    }

    fn spawn_cooldown_timer(&mut self, mint: &str, remaining_ms: u64) {
        let events = self.events.clone();
        let mint_key = mint.to_string();
        let mint = mint_key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(remaining_ms)).await;
            let _ = events.send(EngineEvent::CooldownRecheck { mint });
        });
        self.cooldown_timer = Some((mint_key, handle.abort_handle()));
    }

    fn cancel_pending_timer(&mut self, wallet: &str) {
        if let Some(handle) = self.pending_timers.remove(wallet) {
            handle.abort();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_event(
        &self,
        event: TriggerEvent,
        mint: &str,
        wallet: &str,
        threshold_sol: f64,
        net_sol: f64,
        now_ms: u64,
        detail: String,
    ) {
        let entry = TriggerLogEntry {
            timestamp_ms: now_ms,
            event,
            mint: mint.to_string(),
            wallet: wallet.to_string(),
            threshold_sol,
            net_sol,
            detail,
        };
        if let Err(e) = self.logger.log(entry) {
            warn!("⚠️ Trigger log write failed: {}", e);
        }
    }
}

/// Truncated address for log lines.
fn short(addr: &str) -> &str {
    if addr.len() > 8 {
        &addr[..8]
    } else {
        addr
    }
}
