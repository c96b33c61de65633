//! 🧠 Trade tracker service
//!
//! The single sequential processing path. Every mutation in the system
//! funnels through one command channel: raw feed frames, operator commands,
//! manual injections, and the engine's own timer callbacks. One task owns
//! the deduplicator, the volume accounting, and the engine, so trade
//! processing never races a registry rebuild or a confirmation timer.
//!
//! Processing order per accepted trade: classify ownership → dedup →
//! history → volume → persistence → engine → fan-out → metrics.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::db::{Database, WriteCommand};
use crate::dedup::{DedupStats, TradeDeduplicator};
use crate::engine::auto_sell::{AutoSellEngine, EngineEvent, MevParams, SellExecutor, WalletSellConfig};
use crate::engine::logging::TriggerLogger;
use crate::engine::state::{self, EngineStateFile};
use crate::fanout::TradeBroadcaster;
use crate::feed::FeedHandle;
use crate::metrics;
use crate::normalizer;
use crate::types::{Trade, TradeSide};
use crate::volume::{VolumeTracker, WalletPnl};
use crate::wallets::{WalletRegistry, WalletSet};

/// Everything the service can be asked to do.
pub enum TrackerCommand {
    /// Raw text frame from the upstream feed
    FeedText(String),
    /// Start tracking a token with the operator's wallet set
    Track { mint: String, wallets: WalletSet },
    /// Stop tracking, clear all launch state
    Untrack,
    /// Manually inject a trade through the normal acceptance path
    Inject(Trade),
    /// Confirmation timer fired for a pending sell
    ConfirmSell { mint: String, wallet: String },
    /// Launch cooldown expired, run the trigger checks again
    CooldownRecheck { mint: String },
    SetWalletThreshold { wallet: String, threshold_sol: f64, enabled: bool },
    SetAutoSellEnabled(bool),
    SetMevParams(MevParams),
    /// Back to the pre-launch state for the tracked token
    Reset,
    Snapshot(oneshot::Sender<StatusSnapshot>),
    /// History snapshot plus a live receiver, taken atomically on the
    /// processing path so subscribers see no gap and no overlap
    StreamAttach(oneshot::Sender<(Vec<Trade>, broadcast::Receiver<Trade>)>),
    Shutdown,
}

/// Point-in-time view for /health and the handle's queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mint: Option<String>,
    pub feed_connected: bool,
    pub external_net_sol: f64,
    pub first_external_trade_ms: Option<u64>,
    pub gross_buy_sol: f64,
    pub front_run_detected: bool,
    pub auto_sell_enabled: bool,
    pub mev: MevParams,
    pub wallets: HashMap<String, WalletSellConfig>,
    pub wallet_pnl: HashMap<String, WalletPnl>,
    pub registry_wallets: usize,
    pub history_len: usize,
    pub trade_count: u64,
    pub dedup: DedupStats,
    pub stream_subscribers: usize,
}

/// Cloneable control surface over the tracker task.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::UnboundedSender<TrackerCommand>,
}

impl TrackerHandle {
    fn send(&self, cmd: TrackerCommand) {
        if self.commands.send(cmd).is_err() {
            warn!("⚠️ Tracker command dropped: service not running");
        }
    }

    pub fn feed_text(&self, text: String) {
        self.send(TrackerCommand::FeedText(text));
    }

    pub fn track(&self, mint: String, wallets: WalletSet) {
        self.send(TrackerCommand::Track { mint, wallets });
    }

    pub fn untrack(&self) {
        self.send(TrackerCommand::Untrack);
    }

    pub fn inject(&self, trade: Trade) {
        self.send(TrackerCommand::Inject(trade));
    }

    pub fn set_wallet_threshold(&self, wallet: String, threshold_sol: f64, enabled: bool) {
        self.send(TrackerCommand::SetWalletThreshold { wallet, threshold_sol, enabled });
    }

    pub fn set_auto_sell_enabled(&self, enabled: bool) {
        self.send(TrackerCommand::SetAutoSellEnabled(enabled));
    }

    pub fn set_mev_params(&self, params: MevParams) {
        self.send(TrackerCommand::SetMevParams(params));
    }

    pub fn reset(&self) {
        self.send(TrackerCommand::Reset);
    }

    /// Stop the processing loop. Cancels timers, closes the feed, and
    /// writes the final engine state before the task exits.
    pub fn stop(&self) {
        self.send(TrackerCommand::Shutdown);
    }

    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(TrackerCommand::Snapshot(tx))
            .map_err(|_| anyhow!("tracker is not running"))?;
        rx.await.context("tracker dropped the snapshot request")
    }

    pub async fn stream_attach(&self) -> Result<(Vec<Trade>, broadcast::Receiver<Trade>)> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(TrackerCommand::StreamAttach(tx))
            .map_err(|_| anyhow!("tracker is not running"))?;
        rx.await.context("tracker dropped the stream attach request")
    }
}

pub struct TradeTracker {
    registry: WalletRegistry,
    dedup: TradeDeduplicator,
    volume: VolumeTracker,
    engine: AutoSellEngine,
    /// Newest-first, capacity-bounded
    history: VecDeque<Trade>,
    history_limit: usize,
    default_threshold_sol: f64,
    active_mint: Option<String>,
    db: Database,
    db_writer: mpsc::UnboundedSender<WriteCommand>,
    broadcaster: TradeBroadcaster,
    feed: FeedHandle,
    /// Taken by `start()`, drained into the command funnel
    feed_events: Option<mpsc::UnboundedReceiver<String>>,
    commands: mpsc::UnboundedReceiver<TrackerCommand>,
    command_tx: mpsc::UnboundedSender<TrackerCommand>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    engine_state_path: PathBuf,
}

impl TradeTracker {
    /// Build the service with everything it owns. `initial_state` is the
    /// already-merged engine state (saved file under env overrides).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        db: Database,
        db_writer: mpsc::UnboundedSender<WriteCommand>,
        feed: FeedHandle,
        feed_events: mpsc::UnboundedReceiver<String>,
        executor: Arc<dyn SellExecutor>,
        logger: Arc<TriggerLogger>,
        initial_state: EngineStateFile,
    ) -> (Self, TrackerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let mut engine = AutoSellEngine::new(
            initial_state.auto_sell_enabled,
            initial_state.mev.clone(),
            executor,
            logger,
            engine_tx,
        );
        if !initial_state.wallets.is_empty() || initial_state.front_run_detected {
            engine.restore(
                initial_state.auto_sell_enabled,
                initial_state.mev.clone(),
                initial_state.wallets.clone(),
                initial_state.front_run_detected,
            );
        }

        let tracker = TradeTracker {
            registry: WalletRegistry::new(),
            dedup: TradeDeduplicator::new(
                config.tracker.dedup_max_entries,
                config.tracker.dedup_retained_tail,
            ),
            volume: VolumeTracker::new(initial_state.mev.front_run_window_ms, config.fees.clone()),
            engine,
            history: VecDeque::with_capacity(config.tracker.history_limit),
            history_limit: config.tracker.history_limit,
            default_threshold_sol: config.engine.default_threshold_sol,
            active_mint: None,
            db,
            db_writer,
            broadcaster: TradeBroadcaster::new(),
            feed,
            feed_events: Some(feed_events),
            commands: cmd_rx,
            command_tx: cmd_tx.clone(),
            engine_events: engine_rx,
            engine_state_path: config.storage.engine_state_path.clone(),
        };

        (tracker, TrackerHandle { commands: cmd_tx })
    }

    /// Spawn the processing loop. Feed frames are forwarded into the
    /// command funnel, so ordering between trades and operator commands
    /// is simply their arrival order.
    pub fn start(mut self) -> tokio::task::JoinHandle<()> {
        if let Some(mut feed_events) = self.feed_events.take() {
            let forward_tx = self.command_tx.clone();
            tokio::spawn(async move {
                while let Some(text) = feed_events.recv().await {
                    if forward_tx.send(TrackerCommand::FeedText(text)).is_err() {
                        break;
                    }
                }
                debug!("Feed frame forwarder stopped");
            });
        }
        tokio::spawn(self.run())
    }
    async fn run(mut self) {
        info!("🧠 Tracker processing loop started");
        let mut engine_open = true;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(TrackerCommand::Shutdown) | None => {
                            self.shutdown().await;
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                event = self.engine_events.recv(), if engine_open => {
                    match event {
                        Some(event) => self.handle_engine_event(event),
                        None => engine_open = false,
                    }
                }
            }

            self.persist_engine_state_if_dirty();
        }
    }

    async fn shutdown(&mut self) {
        info!("🧠 Tracker shutting down");
        self.feed.shutdown();
        let _ = self.db_writer.send(WriteCommand::Flush);
        let snapshot = self.engine_state_snapshot();
        if let Err(e) = state::save(&self.engine_state_path, &snapshot).await {
            warn!("⚠️ Final engine state save failed: {}", e);
        }
    }

    fn handle_command(&mut self, cmd: TrackerCommand) {
        match cmd {
            TrackerCommand::FeedText(text) => self.handle_feed_text(&text),
            TrackerCommand::Track { mint, wallets } => self.handle_track(mint, wallets),
            TrackerCommand::Untrack => self.handle_untrack(),
            TrackerCommand::Inject(mut trade) => {
                trade.injected = true;
                info!(
                    "💉 Injected {} {:.4} SOL on {} by {}",
                    trade.side.as_str(),
                    trade.sol_amount,
                    short(&trade.mint),
                    short(&trade.trader)
                );
                self.accept(trade);
            }
            TrackerCommand::ConfirmSell { mint, wallet } => {
                let net = self.volume.net_sol(&mint);
                self.engine.confirm_sell(&mint, &wallet, net, now_ms());
            }
            TrackerCommand::CooldownRecheck { mint } => {
                self.engine.cooldown_recheck_fired(&mint);
                self.evaluate_engine(&mint);
            }
            TrackerCommand::SetWalletThreshold { wallet, threshold_sol, enabled } => {
                let mint = self.active_mint.clone().unwrap_or_default();
                let net = self.volume.net_sol(&mint);
                self.engine
                    .set_wallet_threshold(&wallet, threshold_sol, enabled, &mint, net, now_ms());
                // A newly armed wallet may already be past its threshold
                if self.active_mint.is_some() {
                    self.evaluate_engine(&mint);
                }
            }
            TrackerCommand::SetAutoSellEnabled(enabled) => {
                let mint = self.active_mint.clone().unwrap_or_default();
                let net = self.volume.net_sol(&mint);
                self.engine.set_enabled(enabled, &mint, net, now_ms());
                if enabled && self.active_mint.is_some() {
                    self.evaluate_engine(&mint);
                }
            }
            TrackerCommand::SetMevParams(params) => {
                self.volume.set_window_ms(params.front_run_window_ms);
                self.engine.set_mev_params(params);
            }
            TrackerCommand::Reset => self.handle_reset(),
            TrackerCommand::Snapshot(reply) => {
                let _ = reply.send(self.status_snapshot());
            }
            TrackerCommand::StreamAttach(reply) => {
                // Oldest-first snapshot and a receiver created back-to-back
                // on this path: nothing can slip between them
                let history: Vec<Trade> = self.history.iter().rev().cloned().collect();
                let rx = self.broadcaster.subscribe();
                metrics::set_stream_subscribers(self.broadcaster.subscriber_count() as i64);
                let _ = reply.send((history, rx));
            }
            TrackerCommand::Shutdown => unreachable!("handled in run loop"),
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ConfirmSell { mint, wallet } => {
                let net = self.volume.net_sol(&mint);
                self.engine.confirm_sell(&mint, &wallet, net, now_ms());
            }
            EngineEvent::CooldownRecheck { mint } => {
                self.engine.cooldown_recheck_fired(&mint);
                self.evaluate_engine(&mint);
            }
            EngineEvent::SellFinished { mint, wallet, outcome } => {
                self.engine.sell_finished(&mint, &wallet, outcome, now_ms());
            }
        }
    }

    fn handle_feed_text(&mut self, text: &str) {
        let raw: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("📭 Unparseable feed frame: {}", e);
                metrics::record_malformed_dropped();
                return;
            }
        };

        match normalizer::normalize(&raw, now_ms()) {
            Some(trade) => self.accept(trade),
            None => metrics::record_malformed_dropped(),
        }
    }

    /// The one acceptance path. Feed trades and injected trades both land
    /// here after normalization.
    fn accept(&mut self, mut trade: Trade) {
        // Ownership is classified here, not in the normalizer, so registry
        // rebuilds apply to every trade processed after them
        let entry = self.registry.classify(&trade.trader);
        trade.is_own = entry.is_some();
        trade.owner_label = entry.as_ref().map(|e| e.label.clone());

        if self.dedup.check_and_record(&trade) {
            metrics::record_duplicate_dropped();
            debug!(
                "🔁 Duplicate dropped: {} {} {:.4} SOL by {}",
                trade.side.as_str(),
                short(&trade.mint),
                trade.sol_amount,
                short(&trade.trader)
            );
            return;
        }

        // Account subscriptions deliver the operator's trades on other
        // tokens; they stay in the dedup index but go no further
        let is_active = self.active_mint.as_deref() == Some(trade.mint.as_str());
        if !is_active {
            debug!(
                "📎 Off-token trade on {} recorded for dedup only",
                short(&trade.mint)
            );
            return;
        }

        self.history.push_front(trade.clone());
        if self.history.len() > self.history_limit {
            self.history.pop_back();
        }

        let role = entry.as_ref().map(|e| e.role);
        self.volume.apply(&trade, role);
        let net = self.volume.net_sol(&trade.mint);

        if trade.is_own {
            let label = trade.owner_label.as_deref().unwrap_or("own");
            info!(
                "👛 {} {} {:.4} SOL on {}",
                label,
                trade.side.as_str(),
                trade.sol_amount,
                short(&trade.mint)
            );
        } else {
            let emoji = match trade.side {
                TradeSide::Buy => "💰",
                TradeSide::Sell => "💸",
            };
            info!(
                "{} {} {:.4} SOL by {} | net {:.4} SOL",
                emoji,
                trade.side.as_str(),
                trade.sol_amount,
                short(&trade.trader),
                net
            );
        }

        let _ = self.db_writer.send(WriteCommand::InsertTrade(trade.clone()));
        let _ = self
            .db_writer
            .send(WriteCommand::UpsertSummary(self.volume.summary(&trade.mint)));

        // Engine reacts to external volume changes only
        if !trade.is_own {
            let now = now_ms();
            if trade.side == TradeSide::Buy {
                let gross = self.volume.gross_buy_sol(&trade.mint, trade.timestamp_ms);
                metrics::set_gross_buy_sol(gross);
                self.engine.on_external_buy(&trade.mint, gross, now);
            }
            let first = self.volume.first_trade_ms(&trade.mint);
            self.engine.evaluate(&trade.mint, net, first, now);
        }

        metrics::set_external_net_sol(net);
        self.broadcaster.send(&trade);
        metrics::record_trade_processed(trade.injected);
        metrics::set_stream_subscribers(self.broadcaster.subscriber_count() as i64);
    }

    fn handle_track(&mut self, mint: String, wallets: WalletSet) {
        info!(
            "🚀 Tracking {} with {} owned wallet(s)",
            short(&mint),
            wallets.len()
        );

        // Wholesale replacement of any previous launch
        if let Some(prev) = self.active_mint.take() {
            if prev != mint {
                self.volume.clear_mint(&prev);
            }
        }
        self.history.clear();
        self.registry.replace_all(&wallets);
        self.active_mint = Some(mint.clone());
        self.dedup.set_active_mint(Some(mint.clone()));

        // Restore history and aggregates from disk BEFORE any live trade
        // can land on this path
        let mut restored = match self.db.load_trades(&mint, self.history_limit) {
            Ok(trades) => trades,
            Err(e) => {
                warn!("⚠️ Could not load history for {}: {}", short(&mint), e);
                Vec::new()
            }
        };
        for trade in &mut restored {
            let entry = self.registry.classify(&trade.trader);
            trade.is_own = entry.is_some();
            trade.owner_label = entry.map(|e| e.label);
            self.dedup.seed(trade);
        }
        for trade in &restored {
            self.history.push_front(trade.clone());
        }

        let registry = self.registry.clone();
        self.volume
            .recompute(&mint, &restored, move |addr| {
                registry.classify(addr).map(|e| e.role)
            });
        if !restored.is_empty() {
            info!(
                "📥 Restored {} trade(s) for {}: net {:.4} SOL",
                restored.len(),
                short(&mint),
                self.volume.net_sol(&mint)
            );
        }
        metrics::set_external_net_sol(self.volume.net_sol(&mint));

        // Funding only moves SOL; every other owned wallet can be armed
        let sellable = self.registry.sellable_addresses();
        self.engine.install_wallets(&sellable, self.default_threshold_sol);

        // Subscriptions last, once state is ready for live trades
        self.feed.subscribe_token(&mint);
        let owned = self.registry.owned_addresses();
        if !owned.is_empty() {
            self.feed.subscribe_accounts(owned);
        }

        // Restored volume may already satisfy a threshold
        self.evaluate_engine(&mint);
    }

    fn handle_untrack(&mut self) {
        let Some(mint) = self.active_mint.take() else {
            info!("🛑 Untrack requested but nothing is tracked");
            return;
        };
        info!("🛑 Untracking {}", short(&mint));

        self.feed.unsubscribe_token();
        let owned = self.registry.owned_addresses();
        if !owned.is_empty() {
            self.feed.unsubscribe_accounts(owned);
        }

        self.engine.clear(&mint, now_ms());
        self.volume.clear_mint(&mint);
        self.history.clear();
        self.registry.clear();
        self.dedup.set_active_mint(None);
        self.dedup.clear();
        metrics::set_external_net_sol(0.0);
        metrics::set_gross_buy_sol(0.0);
    }

    /// Pre-launch state for the tracked token: engine latches and timers
    /// gone, volume zeroed, thresholds kept. The dedup index survives so
    /// re-deliveries of old trades stay dropped.
    fn handle_reset(&mut self) {
        let Some(mint) = self.active_mint.clone() else {
            info!("🧹 Reset requested but nothing is tracked");
            return;
        };
        info!("🧹 Resetting launch state for {}", short(&mint));

        self.engine.reset(&mint, now_ms());
        self.volume.clear_mint(&mint);
        self.history.clear();
        metrics::set_external_net_sol(0.0);
        metrics::set_gross_buy_sol(0.0);
    }

    fn evaluate_engine(&mut self, mint: &str) {
        let net = self.volume.net_sol(mint);
        let first = self.volume.first_trade_ms(mint);
        self.engine.evaluate(mint, net, first, now_ms());
    }

    fn status_snapshot(&mut self) -> StatusSnapshot {
        let mint = self.active_mint.clone();
        let now = now_ms();
        let (net, first, gross, pnl, trade_count) = match mint.as_deref() {
            Some(m) => (
                self.volume.net_sol(m),
                self.volume.first_trade_ms(m),
                self.volume.gross_buy_sol(m, now),
                self.volume.all_wallet_pnl(m),
                self.volume.summary(m).trade_count,
            ),
            None => (0.0, None, 0.0, HashMap::new(), 0),
        };

        StatusSnapshot {
            mint,
            feed_connected: metrics::feed_connected(),
            external_net_sol: net,
            first_external_trade_ms: first,
            gross_buy_sol: gross,
            front_run_detected: self.engine.is_front_run_detected(),
            auto_sell_enabled: self.engine.enabled(),
            mev: self.engine.mev().clone(),
            wallets: self.engine.wallet_configs().clone(),
            wallet_pnl: pnl,
            registry_wallets: self.registry.len(),
            history_len: self.history.len(),
            trade_count,
            dedup: self.dedup.stats(),
            stream_subscribers: self.broadcaster.subscriber_count(),
        }
    }

    fn engine_state_snapshot(&self) -> EngineStateFile {
        EngineStateFile {
            auto_sell_enabled: self.engine.enabled(),
            mev: self.engine.mev().clone(),
            wallets: self.engine.wallet_configs().clone(),
            front_run_detected: self.engine.is_front_run_detected(),
            saved_at_ms: now_ms(),
        }
    }

    /// Engine mutations persist on the spot; the write itself runs off
    /// the processing path.
    fn persist_engine_state_if_dirty(&mut self) {
        if !self.engine.take_dirty() {
            return;
        }
        let snapshot = self.engine_state_snapshot();
        let path = self.engine_state_path.clone();
        tokio::spawn(async move {
            if let Err(e) = state::save(&path, &snapshot).await {
                warn!("⚠️ Engine state save failed: {}", e);
            }
        });
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Truncated address for log lines.
fn short(addr: &str) -> &str {
    if addr.len() > 8 {
        &addr[..8]
    } else {
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        EngineConfig, FeeConfig, FeedConfig, LaunchConfig, LoggingConfig, ServerConfig,
        StorageConfig, TrackerConfig,
    };
    use crate::db::spawn_writer;
    use crate::feed::spawn_feed;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockExecutor {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl MockExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SellExecutor for MockExecutor {
        async fn execute_sell(&self, _mint: &str, wallet: &str) -> Result<String> {
            self.calls.lock().unwrap().push(wallet.to_string());
            if self.fail {
                bail!("mock failure");
            }
            Ok("mock-receipt".to_string())
        }
    }

    fn test_config(name: &str, confirmation_delay_ms: u64, cooldown_ms: u64) -> Config {
        let dir = std::env::temp_dir();
        Config {
            feed: FeedConfig {
                endpoint: "ws://127.0.0.1:9".to_string(),
                heartbeat_interval_secs: 30,
                reconnect_base_delay_ms: 60_000,
                reconnect_max_delay_ms: 60_000,
            },
            launch: LaunchConfig {
                mint: None,
                funding_wallet: None,
                creator_wallet: None,
                bundle_wallets: vec![],
                holder_wallets: vec![],
            },
            tracker: TrackerConfig {
                history_limit: 100,
                dedup_max_entries: 1000,
                dedup_retained_tail: 100,
            },
            engine: EngineConfig {
                auto_sell_enabled: true,
                default_threshold_sol: 1.0,
                confirmation_delay_ms,
                launch_cooldown_ms: cooldown_ms,
                front_run_window_ms: 3000,
                front_run_threshold_sol: 0.0,
            },
            fees: FeeConfig {
                trading_fee_pct: 0.01,
                network_fee_sol: 0.000005,
                creator_network_fee_sol: 0.00001,
                account_rent_sol: 0.002,
            },
            storage: StorageConfig {
                sqlite_path: dir.join(format!("{}_trades.db", name)),
                engine_state_path: dir.join(format!("{}_engine.json", name)),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 0,
            },
            logging: LoggingConfig {
                trigger_log_path: dir.join(format!("{}_triggers.csv", name)),
                log_level: "debug".to_string(),
            },
        }
    }

    /// Fresh tracker over a clean temp database.
    fn start_tracker(config: &Config) -> (TrackerHandle, Arc<MockExecutor>) {
        let _ = std::fs::remove_file(&config.storage.sqlite_path);
        let _ = std::fs::remove_file(&config.storage.engine_state_path);
        let _ = std::fs::remove_file(&config.logging.trigger_log_path);
        start_tracker_existing_db(config)
    }

    /// Tracker over whatever is already in the database (restart case).
    fn start_tracker_existing_db(config: &Config) -> (TrackerHandle, Arc<MockExecutor>) {
        let db = Database::new(&config.storage.sqlite_path, true).unwrap();
        let writer_conn = Database::new(&config.storage.sqlite_path, true)
            .unwrap()
            .into_connection();
        let (db_writer, _writer_handle) = spawn_writer(writer_conn);
        // The endpoint is unroutable; the feed task just backs off in the
        // background while frames are driven through the handle
        let (feed, feed_events, _feed_task) = spawn_feed(config.feed.clone());
        let executor = MockExecutor::new();
        let logger = Arc::new(TriggerLogger::new(&config.logging.trigger_log_path).unwrap());
        let initial_state = EngineStateFile::from_config(&config.engine);

        let (tracker, handle) = TradeTracker::new(
            config,
            db,
            db_writer,
            feed,
            feed_events,
            executor.clone(),
            logger,
            initial_state,
        );
        tracker.start();
        (handle, executor)
    }

    fn buy_frame(mint: &str, trader: &str, sol: f64, sig: &str, ts_ms: u64) -> String {
        serde_json::json!({
            "txType": "buy",
            "mint": mint,
            "traderPublicKey": trader,
            "solAmount": sol,
            "tokenAmount": 1000.0,
            "timestamp": ts_ms,
            "signature": sig,
        })
        .to_string()
    }

    fn sell_frame(mint: &str, trader: &str, sol: f64, sig: &str, ts_ms: u64) -> String {
        serde_json::json!({
            "txType": "sell",
            "mint": mint,
            "traderPublicKey": trader,
            "solAmount": sol,
            "timestamp": ts_ms,
            "signature": sig,
        })
        .to_string()
    }

    fn holder_set(addrs: &[&str]) -> WalletSet {
        WalletSet {
            funding: None,
            creator: None,
            bundles: vec![],
            holders: addrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn wait_until<F>(handle: &TrackerHandle, what: &str, pred: F) -> StatusSnapshot
    where
        F: Fn(&StatusSnapshot) -> bool,
    {
        for _ in 0..150 {
            if let Ok(snap) = handle.snapshot().await {
                if pred(&snap) {
                    return snap;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never reached: {}", what);
    }

    const MINT: &str = "MINTTEST11111111";

    #[tokio::test]
    async fn test_launch_flow_buys_cross_threshold_and_sell_fires() {
        let config = test_config("tracker_launch", 50, 0);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        let now = now_ms();

        // 0.6 + 0.7 external SOL crosses the 1.0 default threshold
        handle.feed_text(buy_frame(MINT, "EXT1", 0.6, "sig-e1", now - 60_000));
        handle.feed_text(buy_frame(MINT, "EXT2", 0.7, "sig-e2", now - 59_000));

        let snap = wait_until(&handle, "wallet triggered", |s| {
            s.wallets
                .get("HOLDER_W1")
                .map(|w| w.state.is_triggered())
                .unwrap_or(false)
        })
        .await;

        assert!((snap.external_net_sol - 1.3).abs() < 1e-9);
        assert_eq!(snap.history_len, 2);

        // The executor ran exactly once and its result was recorded
        let snap = wait_until(&handle, "sell result recorded", |s| {
            s.wallets
                .get("HOLDER_W1")
                .and_then(|w| w.last_result.as_ref())
                .map(|r| r.ok)
                .unwrap_or(false)
        })
        .await;
        assert_eq!(executor.call_count(), 1);
        assert!(snap.auto_sell_enabled);
    }

    #[tokio::test]
    async fn test_sell_cancelled_when_volume_drops_during_delay() {
        let config = test_config("tracker_cancel", 400, 0);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        let now = now_ms();

        handle.feed_text(buy_frame(MINT, "EXT1", 1.2, "sig-e1", now - 60_000));
        wait_until(&handle, "wallet pending", |s| {
            s.wallets
                .get("HOLDER_W1")
                .map(|w| w.state.is_pending())
                .unwrap_or(false)
        })
        .await;

        // A dump during the confirmation delay pulls net below threshold
        handle.feed_text(sell_frame(MINT, "EXT2", 1.0, "sig-e2", now - 59_000));

        let snap = wait_until(&handle, "wallet back to idle", |s| {
            s.wallets
                .get("HOLDER_W1")
                .map(|w| w.state.is_idle())
                .unwrap_or(false)
        })
        .await;
        assert!((snap.external_net_sol - 0.2).abs() < 1e-9);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_own_trades_and_duplicates_stay_out_of_net_volume() {
        let config = test_config("tracker_classify", 1000, 0);
        let (handle, _executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1", "HOLDER_W2"]));
        let now = now_ms();

        // Own buy: counted in history and P&L, never in net volume
        handle.feed_text(buy_frame(MINT, "HOLDER_W1", 5.0, "sig-own", now - 60_000));
        // External buy, delivered twice
        handle.feed_text(buy_frame(MINT, "EXT1", 0.4, "sig-e1", now - 59_000));
        handle.feed_text(buy_frame(MINT, "EXT1", 0.4, "sig-e1", now - 59_000));

        let snap = wait_until(&handle, "both uniques processed", |s| s.history_len == 2).await;
        assert!((snap.external_net_sol - 0.4).abs() < 1e-9);
        assert_eq!(snap.dedup.duplicates_dropped, 1);

        let pnl = snap.wallet_pnl.get("HOLDER_W1").expect("own wallet P&L");
        assert_eq!(pnl.buys_sol, 5.0);

        // Injection flows through the same path
        handle.inject(Trade {
            mint: MINT.to_string(),
            trader: "EXT9".to_string(),
            side: TradeSide::Sell,
            sol_amount: 0.1,
            token_amount: 0.0,
            timestamp_ms: now - 58_000,
            signature: None,
            is_own: false,
            owner_label: None,
            injected: false,
        });
        let snap = wait_until(&handle, "injected trade processed", |s| s.history_len == 3).await;
        assert!((snap.external_net_sol - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cooldown_holds_trigger_until_quiet_period_ends() {
        let config = test_config("tracker_cooldown", 0, 300);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));

        // First external trade is NOW, so the cooldown is running
        let now = now_ms();
        handle.feed_text(buy_frame(MINT, "EXT1", 2.0, "sig-e1", now));

        let snap = wait_until(&handle, "volume applied", |s| s.history_len == 1).await;
        assert!(
            snap.wallets["HOLDER_W1"].state.is_idle(),
            "trigger must wait out the cooldown"
        );
        assert_eq!(executor.call_count(), 0);

        // The re-check fires after the cooldown and the sell goes through
        wait_until(&handle, "triggered after cooldown", |s| {
            s.wallets["HOLDER_W1"].state.is_triggered()
        })
        .await;
    }

    #[tokio::test]
    async fn test_untrack_clears_launch_state() {
        let config = test_config("tracker_untrack", 1000, 0);
        let (handle, _executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        let now = now_ms();
        handle.feed_text(buy_frame(MINT, "EXT1", 0.5, "sig-e1", now - 60_000));
        wait_until(&handle, "trade processed", |s| s.history_len == 1).await;

        handle.untrack();
        let snap = wait_until(&handle, "untracked", |s| s.mint.is_none()).await;
        assert_eq!(snap.history_len, 0);
        assert_eq!(snap.external_net_sol, 0.0);
        assert_eq!(snap.registry_wallets, 0);
        assert!(snap.wallets.is_empty());
    }

    #[tokio::test]
    async fn test_reset_returns_to_prelaunch_but_keeps_thresholds() {
        let config = test_config("tracker_reset", 0, 0);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        let now = now_ms();
        handle.feed_text(buy_frame(MINT, "EXT1", 1.5, "sig-e1", now - 60_000));

        wait_until(&handle, "triggered", |s| {
            s.wallets["HOLDER_W1"].state.is_triggered()
        })
        .await;
        assert_eq!(executor.call_count(), 1);

        handle.reset();
        let snap = wait_until(&handle, "reset applied", |s| {
            s.wallets["HOLDER_W1"].state.is_idle() && s.history_len == 0
        })
        .await;
        assert_eq!(snap.external_net_sol, 0.0);
        assert_eq!(snap.wallets["HOLDER_W1"].threshold_sol, 1.0);

        // Old trades stay deduplicated across the reset; a new one re-arms
        handle.feed_text(buy_frame(MINT, "EXT1", 1.5, "sig-e1", now - 60_000));
        handle.feed_text(buy_frame(MINT, "EXT2", 1.5, "sig-e2", now - 59_000));
        wait_until(&handle, "re-triggered after reset", |s| {
            s.wallets["HOLDER_W1"].state.is_triggered()
        })
        .await;
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_restart_restores_history_and_volume_from_db() {
        let config = test_config("tracker_restart", 1000, 0);
        let now = now_ms();
        {
            let (handle, _executor) = start_tracker(&config);
            handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
            handle.feed_text(buy_frame(MINT, "EXT1", 0.8, "sig-e1", now - 60_000));
            handle.feed_text(sell_frame(MINT, "EXT2", 0.3, "sig-e2", now - 59_000));
            wait_until(&handle, "trades processed", |s| s.history_len == 2).await;

            // Stopping flushes the writer and saves the engine state
            handle.stop();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        // Stop sent a forced flush; give the writer thread a beat
        tokio::time::sleep(Duration::from_millis(500)).await;

        let (handle, _executor) = start_tracker_existing_db(&config);
        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));

        let snap = wait_until(&handle, "history restored", |s| s.history_len == 2).await;
        assert!((snap.external_net_sol - 0.5).abs() < 1e-9);
        assert_eq!(snap.first_external_trade_ms, Some(now - 60_000));

        // A replay of a restored trade is a duplicate
        handle.feed_text(buy_frame(MINT, "EXT1", 0.8, "sig-e1", now - 60_000));
        wait_until(&handle, "replay dropped", |s| s.dedup.duplicates_dropped >= 1).await;
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.history_len, 2);
    }

    #[tokio::test]
    async fn test_stream_attach_sees_history_then_live() {
        let config = test_config("tracker_stream", 1000, 0);
        let (handle, _executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&[]));
        let now = now_ms();
        handle.feed_text(buy_frame(MINT, "EXT1", 0.1, "sig-e1", now - 60_000));
        handle.feed_text(buy_frame(MINT, "EXT2", 0.2, "sig-e2", now - 59_000));
        wait_until(&handle, "history built", |s| s.history_len == 2).await;

        let (history, mut rx) = handle.stream_attach().await.unwrap();
        assert_eq!(history.len(), 2);
        // Snapshot is oldest first
        assert_eq!(history[0].sol_amount, 0.1);
        assert_eq!(history[1].sol_amount, 0.2);

        handle.feed_text(buy_frame(MINT, "EXT3", 0.3, "sig-e3", now - 58_000));
        let live = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("live trade never arrived")
            .unwrap();
        assert_eq!(live.sol_amount, 0.3);
    }

    #[tokio::test]
    async fn test_threshold_update_can_trigger_immediately() {
        let config = test_config("tracker_threshold", 0, 0);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1", "HOLDER_W2"]));
        let now = now_ms();
        // Net 0.5 is under the 1.0 default: nothing fires
        handle.feed_text(buy_frame(MINT, "EXT1", 0.5, "sig-e1", now - 60_000));
        wait_until(&handle, "volume applied", |s| s.history_len == 1).await;
        assert_eq!(executor.call_count(), 0);

        // Lowering one wallet's threshold below current net fires it alone
        handle.set_wallet_threshold("HOLDER_W2".to_string(), 0.4, true);
        wait_until(&handle, "lowered threshold triggered", |s| {
            s.wallets["HOLDER_W2"].state.is_triggered()
        })
        .await;
        let snap = handle.snapshot().await.unwrap();
        assert!(snap.wallets["HOLDER_W1"].state.is_idle());
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabling_auto_sell_blocks_triggers() {
        let config = test_config("tracker_disable", 0, 0);
        let (handle, executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        handle.set_auto_sell_enabled(false);
        let now = now_ms();

        handle.feed_text(buy_frame(MINT, "EXT1", 5.0, "sig-e1", now - 60_000));
        let snap = wait_until(&handle, "volume applied", |s| s.history_len == 1).await;
        assert!(!snap.auto_sell_enabled);
        assert!(snap.wallets["HOLDER_W1"].state.is_idle());
        assert_eq!(executor.call_count(), 0);

        // Re-enabling re-evaluates against current volume
        handle.set_auto_sell_enabled(true);
        wait_until(&handle, "triggered after enable", |s| {
            s.wallets["HOLDER_W1"].state.is_triggered()
        })
        .await;
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_front_run_guard_latches_on_burst() {
        let mut config = test_config("tracker_frontrun", 1000, 0);
        config.engine.front_run_threshold_sol = 1.0;
        let (handle, _executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        let now = now_ms();

        // Two buys inside the window sum past the guard threshold
        handle.feed_text(buy_frame(MINT, "EXT1", 0.6, "sig-e1", now - 1000));
        handle.feed_text(buy_frame(MINT, "EXT2", 0.6, "sig-e2", now - 500));

        let snap = wait_until(&handle, "front-run latched", |s| s.front_run_detected).await;
        assert!(snap.gross_buy_sol >= 1.0 || snap.front_run_detected);

        // Reset clears the latch
        handle.reset();
        wait_until(&handle, "latch cleared", |s| !s.front_run_detected).await;
    }

    #[tokio::test]
    async fn test_engine_state_follows_wallet_set_across_retrack() {
        let config = test_config("tracker_retrack", 1000, 0);
        let (handle, _executor) = start_tracker(&config);

        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1"]));
        handle.set_wallet_threshold("HOLDER_W1".to_string(), 7.5, true);
        wait_until(&handle, "threshold set", |s| {
            s.wallets.get("HOLDER_W1").map(|w| w.threshold_sol) == Some(7.5)
        })
        .await;

        // Re-tracking with the same wallet keeps the tuned threshold;
        // a new wallet gets the default
        handle.track(MINT.to_string(), holder_set(&["HOLDER_W1", "HOLDER_W2"]));
        let snap = wait_until(&handle, "retracked", |s| s.wallets.len() == 2).await;
        assert_eq!(snap.wallets["HOLDER_W1"].threshold_sol, 7.5);
        assert_eq!(snap.wallets["HOLDER_W2"].threshold_sol, 1.0);

        // Tracking a different token drops the old wallet set
        handle.track("OTHERMINT1111111".to_string(), holder_set(&["HOLDER_W9"]));
        let snap = wait_until(&handle, "switched token", |s| {
            s.mint.as_deref() == Some("OTHERMINT1111111")
        })
        .await;
        assert!(snap.wallets.contains_key("HOLDER_W9"));
        assert!(!snap.wallets.contains_key("HOLDER_W1"));
    }
}
