//! 📝 Async DB writer, decoupled from the ingestion path
//!
//! Dedicated blocking thread for batched SQLite writes so a slow disk never
//! stalls the websocket stream. Receives write commands via channel, batches
//! them, and commits everything in a single transaction per flush.

use anyhow::Result;
use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::metrics;
use crate::types::Trade;
use crate::volume::VolumeSummary;

/// Maximum batch size before forcing a flush
const BATCH_MAX_SIZE: usize = 500;

/// Maximum time to hold items in a batch before flushing (ms)
const BATCH_MAX_LATENCY_MS: u64 = 1000;

/// Write commands sent from the ingestion path
#[derive(Debug, Clone)]
pub enum WriteCommand {
    InsertTrade(Trade),
    UpsertSummary(VolumeSummary),
    /// Push everything batched to disk now, debounce timer or not
    Flush,
}

struct DbWriter {
    conn: Connection,
    trade_batch: Vec<Trade>,
    /// Latest summary per mint wins; no point writing superseded rows
    summary_batch: HashMap<String, VolumeSummary>,
}

impl DbWriter {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            trade_batch: Vec::with_capacity(BATCH_MAX_SIZE),
            summary_batch: HashMap::new(),
        }
    }

    /// Main writer loop. Runs on a plain OS thread because SQLite calls
    /// block; `blocking_recv` keeps it off the tokio runtime entirely.
    fn run_blocking(mut self, mut rx: mpsc::UnboundedReceiver<WriteCommand>) {
        info!("📝 DB writer started (blocking thread)");

        let mut last_flush = Instant::now();
        let flush_interval = Duration::from_millis(BATCH_MAX_LATENCY_MS);

        loop {
            match rx.blocking_recv() {
                Some(cmd) => {
                    let mut force = self.handle_command(cmd);

                    // Drain whatever else is queued so one transaction
                    // covers the burst
                    while let Ok(cmd) = rx.try_recv() {
                        force |= self.handle_command(cmd);
                        if self.should_flush_size() {
                            break;
                        }
                    }

                    if force || self.should_flush_size() || last_flush.elapsed() >= flush_interval {
                        if let Err(e) = self.flush_all() {
                            warn!("❌ DB flush failed: {}", e);
                            metrics::record_db_flush_error();
                        }
                        last_flush = Instant::now();
                    }
                }
                None => {
                    // Channel closed on shutdown: whatever is still batched
                    // goes to disk before the thread exits
                    if let Err(e) = self.flush_all() {
                        warn!("❌ Final DB flush failed: {}", e);
                        metrics::record_db_flush_error();
                    }
                    info!("📝 DB writer channel closed, exiting");
                    break;
                }
            }
        }
    }

    /// Returns true when the command demands an immediate flush.
    fn handle_command(&mut self, cmd: WriteCommand) -> bool {
        match cmd {
            WriteCommand::InsertTrade(trade) => {
                self.trade_batch.push(trade);
                false
            }
            WriteCommand::UpsertSummary(summary) => {
                self.summary_batch.insert(summary.mint.clone(), summary);
                false
            }
            WriteCommand::Flush => true,
        }
    }

    fn should_flush_size(&self) -> bool {
        self.trade_batch.len() >= BATCH_MAX_SIZE
    }

    /// Flush both batches in a single transaction.
    fn flush_all(&mut self) -> Result<()> {
        let total_items = self.trade_batch.len() + self.summary_batch.len();
        if total_items == 0 {
            return Ok(());
        }
        let start = Instant::now();

        let tx = self.conn.transaction()?;

        if !self.trade_batch.is_empty() {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR IGNORE INTO trades (
                    mint, trader, side, sol_amount, token_amount,
                    timestamp_ms, signature, is_own, owner_label, injected
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;

            for trade in &self.trade_batch {
                stmt.execute(rusqlite::params![
                    trade.mint,
                    trade.trader,
                    trade.side.as_str(),
                    trade.sol_amount,
                    trade.token_amount,
                    trade.timestamp_ms,
                    trade.signature,
                    trade.is_own as i32,
                    trade.owner_label,
                    trade.injected as i32,
                ])?;
            }
        }

        if !self.summary_batch.is_empty() {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO mint_summaries (
                    mint, external_net_sol, external_buys, external_sells,
                    first_external_trade_ms, trade_count, updated_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;

            for summary in self.summary_batch.values() {
                stmt.execute(rusqlite::params![
                    summary.mint,
                    summary.external_net_sol,
                    summary.external_buys,
                    summary.external_sells,
                    summary.first_external_trade_ms,
                    summary.trade_count,
                    now_ms,
                ])?;
            }
        }

        tx.commit()?;

        metrics::record_rows_persisted(self.trade_batch.len() as u64);
        self.trade_batch.clear();
        self.summary_batch.clear();

        let elapsed = start.elapsed();
        if total_items > 50 || elapsed.as_millis() > 10 {
            debug!("💾 DB flush: {} item(s) in {:?}", total_items, elapsed);
        }
        Ok(())
    }
}

/// Spawn the writer on a dedicated OS thread. Dropping the sender drains
/// the batch and stops the thread; join the handle for a clean shutdown.
pub fn spawn_writer(
    conn: Connection,
) -> (mpsc::UnboundedSender<WriteCommand>, std::thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = std::thread::spawn(move || {
        DbWriter::new(conn).run_blocking(rx);
    });

    info!("✅ DB writer thread started");
    (tx, handle)
}
