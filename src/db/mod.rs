//! SQLite persistence for trade history and per-token volume summaries.
//!
//! The hot path never touches the connection directly; rows go through the
//! batched writer thread in [`writer`]. This module owns schema setup and
//! the read side used when a token starts being tracked.

pub mod writer;

use anyhow::{Context, Result};
use log::info;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::types::{Trade, TradeSide};

pub use writer::{spawn_writer, WriteCommand};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open(path).context("Failed to open database connection")?;

        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .context("Failed to enable WAL mode")?;
        }

        let db = Self { conn };
        db.initialize_schema()?;

        info!("✅ Database initialized");
        Ok(db)
    }

    /// Hand the raw connection to the writer thread.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            -- Trade history, one row per accepted trade
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mint TEXT NOT NULL,
                trader TEXT NOT NULL,
                side TEXT CHECK(side IN ('buy', 'sell')) NOT NULL,
                sol_amount REAL NOT NULL,
                token_amount REAL NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                signature TEXT,
                is_own INTEGER DEFAULT 0,
                owner_label TEXT,
                injected INTEGER DEFAULT 0
            );

            -- Latest volume summary per token
            CREATE TABLE IF NOT EXISTS mint_summaries (
                mint TEXT PRIMARY KEY,
                external_net_sol REAL NOT NULL,
                external_buys INTEGER NOT NULL,
                external_sells INTEGER NOT NULL,
                first_external_trade_ms INTEGER,
                trade_count INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_mint_time ON trades(mint, timestamp_ms);
            -- Signed trades are unique; replays across restarts collapse here
            CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_signature
                ON trades(signature) WHERE signature IS NOT NULL;
            "#,
            )
            .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Most recent `limit` trades for a token, oldest first. Feeds the
    /// volume recompute and the history snapshot at track time.
    pub fn load_trades(&self, mint: &str, limit: usize) -> Result<Vec<Trade>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT mint, trader, side, sol_amount, token_amount, timestamp_ms,
                   signature, is_own, owner_label, injected
            FROM (
                SELECT * FROM trades
                WHERE mint = ?1
                ORDER BY timestamp_ms DESC, id DESC
                LIMIT ?2
            )
            ORDER BY timestamp_ms ASC, id ASC
            "#,
        )?;

        let trades = stmt
            .query_map(params![mint, limit as i64], |row| {
                let side_str: String = row.get(2)?;
                let side = if side_str == "buy" { TradeSide::Buy } else { TradeSide::Sell };

                Ok(Trade {
                    mint: row.get(0)?,
                    trader: row.get(1)?,
                    side,
                    sol_amount: row.get(3)?,
                    token_amount: row.get(4)?,
                    timestamp_ms: row.get(5)?,
                    signature: row.get(6)?,
                    is_own: row.get::<_, i32>(7)? != 0,
                    owner_label: row.get(8)?,
                    injected: row.get::<_, i32>(9)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(trades)
    }
}
