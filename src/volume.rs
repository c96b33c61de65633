//! 📊 Volume accounting
//!
//! Tracks, per token:
//! - net external SOL flow (outside buys add, outside sells subtract; the
//!   operator's own wallets never move it)
//! - timestamp of the first external trade (launch cooldown anchor)
//! - a sliding window of external buys for front-run detection
//! - per-owned-wallet buy/sell/fee totals for realized profit
//!
//! All mutation happens through `apply`, and `recompute` replays a history
//! through the same path, so live accounting and recovery can never
//! disagree.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::config::FeeConfig;
use crate::types::{Trade, TradeSide, WalletRole};

/// Running totals for one owned wallet.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WalletPnl {
    pub buys_sol: f64,
    pub sells_sol: f64,
    pub fees_sol: f64,
    /// Token account rent is charged once, on the first buy.
    pub bought_once: bool,
}

impl WalletPnl {
    /// Realized profit: SOL out minus SOL in minus every fee paid.
    pub fn profit(&self) -> f64 {
        self.sells_sol - self.buys_sol - self.fees_sol
    }
}

/// Aggregate snapshot for status output and persistence.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeSummary {
    pub mint: String,
    pub external_net_sol: f64,
    pub external_buys: u64,
    pub external_sells: u64,
    pub first_external_trade_ms: Option<u64>,
    pub trade_count: u64,
}

#[derive(Debug, Default)]
struct MintVolume {
    external_net_sol: f64,
    external_buys: u64,
    external_sells: u64,
    first_external_trade_ms: Option<u64>,
    trade_count: u64,
    /// External buys inside the front-run window: (timestamp_ms, sol)
    window: VecDeque<(u64, f64)>,
    wallet_pnl: HashMap<String, WalletPnl>,
}

impl MintVolume {
    fn prune_window(&mut self, now_ms: u64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        while let Some((ts, _)) = self.window.front() {
            if *ts < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn gross_buy_sol(&self) -> f64 {
        self.window.iter().map(|(_, sol)| sol).sum()
    }
}

/// Per-mint volume accountant, owned by the ingestion path.
pub struct VolumeTracker {
    mints: HashMap<String, MintVolume>,
    window_ms: u64,
    fees: FeeConfig,
}

impl VolumeTracker {
    pub fn new(window_ms: u64, fees: FeeConfig) -> Self {
        Self {
            mints: HashMap::new(),
            window_ms,
            fees,
        }
    }

    /// Adjust the front-run window (runtime MEV parameter update).
    pub fn set_window_ms(&mut self, window_ms: u64) {
        self.window_ms = window_ms;
    }

    /// Fold one accepted trade into the accounting. `role` is the wallet's
    /// registry role when the trade is the operator's own.
    pub fn apply(&mut self, trade: &Trade, role: Option<WalletRole>) {
        let window_ms = self.window_ms;
        let entry = self.mints.entry(trade.mint.clone()).or_default();
        entry.trade_count += 1;

        if trade.is_own {
            let trading_fee = trade.sol_amount * self.fees.trading_fee_pct;
            let network_fee = self.fees.network_fee_for(role.unwrap_or(WalletRole::Holder));
            let pnl = entry.wallet_pnl.entry(trade.trader.clone()).or_default();

            match trade.side {
                TradeSide::Buy => {
                    pnl.buys_sol += trade.sol_amount;
                    pnl.fees_sol += trading_fee + network_fee;
                    if !pnl.bought_once {
                        pnl.fees_sol += self.fees.account_rent_sol;
                        pnl.bought_once = true;
                    }
                }
                TradeSide::Sell => {
                    pnl.sells_sol += trade.sol_amount;
                    pnl.fees_sol += trading_fee + network_fee;
                }
            }
            return;
        }

        if entry.first_external_trade_ms.is_none() {
            entry.first_external_trade_ms = Some(trade.timestamp_ms);
        }

        match trade.side {
            TradeSide::Buy => {
                entry.external_net_sol += trade.sol_amount;
                entry.external_buys += 1;
                entry.window.push_back((trade.timestamp_ms, trade.sol_amount));
                entry.prune_window(trade.timestamp_ms, window_ms);
            }
            TradeSide::Sell => {
                entry.external_net_sol -= trade.sol_amount;
                entry.external_sells += 1;
            }
        }
    }

    /// Rebuild one mint's accounting from a trade history. The history is
    /// replayed oldest-first through `apply`, so calling this twice with
    /// the same input lands on identical state.
    pub fn recompute<F>(&mut self, mint: &str, history: &[Trade], role_of: F)
    where
        F: Fn(&str) -> Option<WalletRole>,
    {
        self.mints.remove(mint);

        let mut trades: Vec<&Trade> = history.iter().filter(|t| t.mint == mint).collect();
        trades.sort_by_key(|t| t.timestamp_ms);

        let count = trades.len();
        for trade in trades {
            let role = if trade.is_own {
                role_of(&trade.trader)
            } else {
                None
            };
            self.apply(trade, role);
        }

        log::debug!(
            "🔄 Recomputed volume for {} from {} trades: net {:.4} SOL",
            &mint[..8.min(mint.len())],
            count,
            self.net_sol(mint)
        );
    }

    /// Net external SOL flow. Negative when outside sells dominate.
    pub fn net_sol(&self, mint: &str) -> f64 {
        self.mints.get(mint).map_or(0.0, |m| m.external_net_sol)
    }

    pub fn first_trade_ms(&self, mint: &str) -> Option<u64> {
        self.mints.get(mint).and_then(|m| m.first_external_trade_ms)
    }

    /// Gross external buy volume inside the window ending at `now_ms`.
    pub fn gross_buy_sol(&mut self, mint: &str, now_ms: u64) -> f64 {
        let window_ms = self.window_ms;
        match self.mints.get_mut(mint) {
            Some(m) => {
                m.prune_window(now_ms, window_ms);
                m.gross_buy_sol()
            }
            None => 0.0,
        }
    }

    pub fn wallet_pnl(&self, mint: &str, wallet: &str) -> Option<WalletPnl> {
        self.mints.get(mint).and_then(|m| m.wallet_pnl.get(wallet)).cloned()
    }

    pub fn all_wallet_pnl(&self, mint: &str) -> HashMap<String, WalletPnl> {
        self.mints
            .get(mint)
            .map(|m| m.wallet_pnl.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self, mint: &str) -> VolumeSummary {
        let entry = self.mints.get(mint);
        VolumeSummary {
            mint: mint.to_string(),
            external_net_sol: entry.map_or(0.0, |m| m.external_net_sol),
            external_buys: entry.map_or(0, |m| m.external_buys),
            external_sells: entry.map_or(0, |m| m.external_sells),
            first_external_trade_ms: entry.and_then(|m| m.first_external_trade_ms),
            trade_count: entry.map_or(0, |m| m.trade_count),
        }
    }

    /// Zero out one mint (reset).
    pub fn clear_mint(&mut self, mint: &str) {
        self.mints.remove(mint);
    }

    pub fn clear_all(&mut self) {
        self.mints.clear();
    }
}
