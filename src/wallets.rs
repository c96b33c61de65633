//! 👛 Owned-wallet registry
//!
//! Knows which addresses belong to the operator for the currently tracked
//! launch and what role each one plays (funding, creator, bundle, holder).
//! The ingestion path consults it on every trade to split external volume
//! from the operator's own activity.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{WalletEntry, WalletRole};

/// Role-structured wallet list supplied when tracking starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletSet {
    pub funding: Option<String>,
    pub creator: Option<String>,
    pub bundles: Vec<String>,
    pub holders: Vec<String>,
}

impl WalletSet {
    pub fn is_empty(&self) -> bool {
        self.funding.is_none()
            && self.creator.is_none()
            && self.bundles.is_empty()
            && self.holders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.funding.iter().count()
            + self.creator.iter().count()
            + self.bundles.len()
            + self.holders.len()
    }
}

/// Address -> role/label lookup, shared with the HTTP server for status
/// reporting. All rebuilds happen on the tracker's processing path, so
/// trades processed after `replace_all` returns can only ever see the new
/// set.
#[derive(Clone)]
pub struct WalletRegistry {
    inner: Arc<DashMap<String, WalletEntry>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Drop every previous entry and install the new wallet set.
    /// Wallets of the same role get numbered display labels ("Bundle 2").
    pub fn replace_all(&self, set: &WalletSet) {
        self.inner.clear();

        if let Some(addr) = &set.funding {
            self.insert(addr, WalletRole::Funding, None);
        }
        if let Some(addr) = &set.creator {
            self.insert(addr, WalletRole::Creator, None);
        }
        for (i, addr) in set.bundles.iter().enumerate() {
            self.insert(addr, WalletRole::Bundle, Some(i + 1));
        }
        for (i, addr) in set.holders.iter().enumerate() {
            self.insert(addr, WalletRole::Holder, Some(i + 1));
        }

        log::info!(
            "👛 Wallet registry rebuilt: {} wallets ({} bundle, {} holder)",
            self.inner.len(),
            set.bundles.len(),
            set.holders.len()
        );
    }

    fn insert(&self, address: &str, role: WalletRole, number: Option<usize>) {
        let label = match number {
            Some(n) => format!("{} {}", role.label_base(), n),
            None => role.label_base().to_string(),
        };
        self.inner.insert(
            address.to_string(),
            WalletEntry {
                address: address.to_string(),
                role,
                label,
            },
        );
    }

    /// Remove every entry (untrack / reset).
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn classify(&self, address: &str) -> Option<WalletEntry> {
        self.inner.get(address).map(|e| e.value().clone())
    }

    pub fn is_own(&self, address: &str) -> bool {
        self.inner.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Every registered address, any role.
    pub fn owned_addresses(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    /// Addresses that can hold the token and therefore can be armed for
    /// auto-sell. The funding wallet only moves SOL, never tokens.
    pub fn sellable_addresses(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|e| e.value().role != WalletRole::Funding)
            .map(|e| e.key().clone())
            .collect()
    }

    /// (funding, creator, bundle, holder) counts for status output.
    pub fn role_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for e in self.inner.iter() {
            match e.value().role {
                WalletRole::Funding => counts.0 += 1,
                WalletRole::Creator => counts.1 += 1,
                WalletRole::Bundle => counts.2 += 1,
                WalletRole::Holder => counts.3 += 1,
            }
        }
        counts
    }
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self::new()
    }
}
