//! 🚀 Trade Tracker Service
//!
//! Single-asset launch companion: subscribes to the pump.fun trade feed,
//! classifies and deduplicates every trade, keeps external net volume and
//! per-wallet P&L, and fires threshold-triggered auto-sells through the
//! configured executor.
//!
//! ## Architecture
//! - Feed client (websocket): token + account subscriptions, auto-reconnect
//! - Tracker: one command channel, one sequential processing path
//! - Auto-sell engine: confirmation timers, launch cooldown, front-run guard
//! - SQLite writer thread: batched, debounced persistence
//! - HTTP: SSE trade stream, Prometheus metrics, health snapshot

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;

use trade_tracker::config::Config;
use trade_tracker::db::{spawn_writer, Database};
use trade_tracker::engine::logging::TriggerLogger;
use trade_tracker::engine::state::{self, EnvOverrides};
use trade_tracker::engine::DryRunExecutor;
use trade_tracker::feed::spawn_feed;
use trade_tracker::tracker::TradeTracker;
use trade_tracker::wallets::WalletSet;
use trade_tracker::{metrics, server};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.log_level),
    )
    .init();

    print_banner(&config);

    metrics::init_metrics();
    info!("✅ Metrics: Initialized");

    // Two connections on one file: the tracker reads, the writer thread owns
    // all writes
    let db = Database::new(&config.storage.sqlite_path, true)
        .context("Failed to open SQLite database")?;
    let writer_conn = Database::new(&config.storage.sqlite_path, true)
        .context("Failed to open writer connection")?
        .into_connection();
    let (db_writer, writer_thread) = spawn_writer(writer_conn);
    info!(
        "✅ Database: {} (async writer started)",
        config.storage.sqlite_path.display()
    );

    // Saved engine state loses to any explicitly set env key
    let saved = state::load(&config.storage.engine_state_path).await;
    let initial_state = state::resolve_initial(&config.engine, saved, EnvOverrides::from_env());
    info!(
        "✅ Engine state: auto_sell={}, {} wallet config(s)",
        initial_state.auto_sell_enabled,
        initial_state.wallets.len()
    );

    let logger = Arc::new(
        TriggerLogger::new(&config.logging.trigger_log_path)
            .context("Failed to open trigger log")?,
    );
    info!(
        "✅ Trigger log: {}",
        config.logging.trigger_log_path.display()
    );

    let (feed, feed_events, feed_task) = spawn_feed(config.feed.clone());
    info!("✅ Feed client: {}", config.feed.endpoint);

    let (tracker, handle) = TradeTracker::new(
        &config,
        db,
        db_writer,
        feed,
        feed_events,
        Arc::new(DryRunExecutor),
        logger,
        initial_state,
    );
    let tracker_task = tracker.start();
    info!("✅ Tracker: Processing loop started");

    // Launch configured at boot goes straight into tracking
    if let Some(mint) = config.launch.mint.clone() {
        let wallets = WalletSet {
            funding: config.launch.funding_wallet.clone(),
            creator: config.launch.creator_wallet.clone(),
            bundles: config.launch.bundle_wallets.clone(),
            holders: config.launch.holder_wallets.clone(),
        };
        info!(
            "🚀 Bootstrap: tracking {} with {} owned wallet(s)",
            mint,
            wallets.len()
        );
        handle.track(mint, wallets);
    } else {
        info!("⏳ No TRACK_MINT configured, waiting for a track command");
    }

    let server_handle = handle.clone();
    let server_config = config.server.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_server(server_handle, server_config).await {
            error!("❌ HTTP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown signal received");

    handle.stop();
    if let Err(e) = tracker_task.await {
        warn!("⚠️ Tracker task join failed: {}", e);
    }
    feed_task.abort();

    // Tracker drop closed the writer channel; the thread flushes and exits
    if writer_thread.join().is_err() {
        warn!("⚠️ DB writer thread panicked during shutdown");
    }

    info!("👋 Trade tracker stopped cleanly");
    Ok(())
}

fn print_banner(config: &Config) {
    println!("\n======================================================================");
    println!("📊 TRADE TRACKER - LAUNCH VOLUME & AUTO-SELL ENGINE");
    println!("======================================================================");
    println!("⏰ {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("📡 Feed: {}", config.feed.endpoint);
    println!(
        "🎯 Auto-sell: {} (threshold {:.2} SOL, delay {}ms)",
        if config.engine.auto_sell_enabled { "ON" } else { "OFF" },
        config.engine.default_threshold_sol,
        config.engine.confirmation_delay_ms
    );
    println!(
        "🛡️  Front-run guard: {}",
        if config.engine.front_run_threshold_sol > 0.0 {
            "armed"
        } else {
            "off"
        }
    );
    println!(
        "📊 HTTP: http://{}:{}/stream | /metrics | /health",
        config.server.bind_address, config.server.port
    );
    println!("======================================================================\n");
}
