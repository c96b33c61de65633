//! Trade deduplication
//!
//! Drops re-deliveries of trades already applied to the volume accounting.
//! Two tiers:
//! - signature tier: exact transaction signature match, authoritative
//! - fuzzy tier: for trades without a usable signature, identity is
//!   (trader, side, SOL amount within tolerance, timestamp within window)
//!
//! Two distinct signed trades with near-identical parameters are NOT
//! duplicates of each other; the fuzzy tier only pairs a signed trade with
//! an unsigned sighting of the same fill (manual injection, degraded feed).
//!
//! Eviction is capacity-driven and never removes entries for the mint
//! currently being tracked.

use serde::Serialize;
use std::collections::HashMap;

use crate::types::{Trade, TradeSide};

/// Fuzzy-tier SOL amount tolerance.
pub const SOL_AMOUNT_TOLERANCE: f64 = 0.001;

/// Fuzzy-tier timestamp window (milliseconds).
pub const FUZZY_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Clone)]
struct SignatureMeta {
    mint: String,
    seq: u64,
}

#[derive(Debug, Clone)]
struct FuzzyEntry {
    sol_amount: f64,
    timestamp_ms: u64,
    mint: String,
    signed: bool,
    seq: u64,
}

type FuzzyKey = (String, TradeSide);

/// Statistics for monitoring deduplication effectiveness
#[derive(Debug, Default, Clone, Serialize)]
pub struct DedupStats {
    pub total_checked: u64,
    pub duplicates_dropped: u64,
    pub unique_trades: u64,
    pub evicted_entries: u64,
}

impl DedupStats {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            (self.duplicates_dropped as f64 / self.total_checked as f64) * 100.0
        }
    }
}

/// Duplicate-trade index, owned by the ingestion path.
pub struct TradeDeduplicator {
    by_signature: HashMap<String, SignatureMeta>,
    fuzzy: HashMap<FuzzyKey, Vec<FuzzyEntry>>,
    active_mint: Option<String>,
    next_seq: u64,
    entries: usize,
    max_entries: usize,
    retained_tail: usize,
    stats: DedupStats,
}

impl TradeDeduplicator {
    /// `max_entries` is the size that triggers an eviction pass;
    /// `retained_tail` is how many off-mint entries survive one.
    pub fn new(max_entries: usize, retained_tail: usize) -> Self {
        Self {
            by_signature: HashMap::new(),
            fuzzy: HashMap::new(),
            active_mint: None,
            next_seq: 0,
            entries: 0,
            max_entries,
            retained_tail,
            stats: DedupStats::default(),
        }
    }

    /// Keys for this mint are exempt from eviction until it changes.
    pub fn set_active_mint(&mut self, mint: Option<String>) {
        self.active_mint = mint;
    }

    /// Check whether `trade` was already seen and record it if not.
    /// Returns true if the trade is a duplicate (should be dropped).
    pub fn check_and_record(&mut self, trade: &Trade) -> bool {
        self.stats.total_checked += 1;

        if let Some(sig) = trade.signature.as_deref() {
            if self.by_signature.contains_key(sig) {
                self.stats.duplicates_dropped += 1;
                return true;
            }
            // A signed trade can still be the re-arrival of a fill first
            // seen without a signature.
            if self.fuzzy_match(trade, false) {
                self.stats.duplicates_dropped += 1;
                return true;
            }
            self.record(trade, Some(sig.to_string()));
            return false;
        }

        if self.fuzzy_match(trade, true) {
            self.stats.duplicates_dropped += 1;
            return true;
        }
        self.record(trade, None);
        false
    }

    /// Record a trade restored from storage without counting a check.
    /// Stored rows were deduplicated before they were written, so an
    /// identity collision here just means it is already present.
    pub fn seed(&mut self, trade: &Trade) {
        if let Some(sig) = trade.signature.as_deref() {
            if self.by_signature.contains_key(sig) {
                return;
            }
            self.record(trade, Some(sig.to_string()));
        } else if !self.fuzzy_match(trade, true) {
            self.record(trade, None);
        }
    }

    /// Scan the fuzzy tier for an entry matching this trade's identity.
    /// With `include_signed` false, only unsigned entries count as matches.
    fn fuzzy_match(&self, trade: &Trade, include_signed: bool) -> bool {
        let key = (trade.trader.clone(), trade.side);
        let Some(entries) = self.fuzzy.get(&key) else {
            return false;
        };
        entries.iter().any(|e| {
            (include_signed || !e.signed)
                && e.mint == trade.mint
                && (e.sol_amount - trade.sol_amount).abs() <= SOL_AMOUNT_TOLERANCE
                && e.timestamp_ms.abs_diff(trade.timestamp_ms) <= FUZZY_WINDOW_MS
        })
    }

    fn record(&mut self, trade: &Trade, signature: Option<String>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(sig) = signature {
            self.by_signature.insert(
                sig,
                SignatureMeta {
                    mint: trade.mint.clone(),
                    seq,
                },
            );
            self.entries += 1;
        }

        self.fuzzy
            .entry((trade.trader.clone(), trade.side))
            .or_default()
            .push(FuzzyEntry {
                sol_amount: trade.sol_amount,
                timestamp_ms: trade.timestamp_ms,
                mint: trade.mint.clone(),
                signed: trade.signature.is_some(),
                seq,
            });
        self.entries += 1;
        self.stats.unique_trades += 1;

        if self.entries > self.max_entries {
            self.evict();
        }
    }

    /// Trim off-mint entries oldest-first down to `retained_tail`.
    /// Entries for the active mint are never touched.
    fn evict(&mut self) {
        let active = self.active_mint.clone();
        let is_active = |mint: &str| active.as_deref() == Some(mint);

        let mut other_seqs: Vec<u64> = self
            .by_signature
            .values()
            .filter(|m| !is_active(&m.mint))
            .map(|m| m.seq)
            .chain(
                self.fuzzy
                    .values()
                    .flatten()
                    .filter(|e| !is_active(&e.mint))
                    .map(|e| e.seq),
            )
            .collect();

        if other_seqs.len() <= self.retained_tail {
            return;
        }

        other_seqs.sort_unstable();
        // Everything at or below the cutoff goes, unless it belongs to the
        // active mint.
        let cutoff = other_seqs[other_seqs.len() - self.retained_tail - 1];

        let before = self.entries;
        self.by_signature
            .retain(|_, m| is_active(&m.mint) || m.seq > cutoff);
        for entries in self.fuzzy.values_mut() {
            entries.retain(|e| is_active(&e.mint) || e.seq > cutoff);
        }
        self.fuzzy.retain(|_, v| !v.is_empty());

        self.entries = self.by_signature.len() + self.fuzzy.values().map(Vec::len).sum::<usize>();
        let evicted = before - self.entries;
        self.stats.evicted_entries += evicted as u64;
        log::debug!("🧹 Dedup eviction: {} entries removed, {} kept", evicted, self.entries);
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn stats(&self) -> DedupStats {
        self.stats.clone()
    }

    /// Drop every recorded identity (reset / untrack).
    pub fn clear(&mut self) {
        self.by_signature.clear();
        self.fuzzy.clear();
        self.entries = 0;
    }
}
