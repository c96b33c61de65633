//! Upstream feed control frames
//!
//! The feed speaks a small JSON protocol: each control frame names a
//! method and a list of keys. The desired-subscription set is tracked here
//! so a reconnect can replay exactly what the service wants to hear.

use serde_json::json;
use std::collections::BTreeSet;

pub const SUBSCRIBE_TOKEN_TRADE: &str = "subscribeTokenTrade";
pub const UNSUBSCRIBE_TOKEN_TRADE: &str = "unsubscribeTokenTrade";
pub const SUBSCRIBE_ACCOUNT_TRADE: &str = "subscribeAccountTrade";
pub const UNSUBSCRIBE_ACCOUNT_TRADE: &str = "unsubscribeAccountTrade";

fn frame(method: &str, keys: &[String]) -> String {
    json!({ "method": method, "keys": keys }).to_string()
}

/// Commands accepted by the feed task while connected or not.
#[derive(Debug, Clone)]
pub enum FeedCommand {
    SubscribeToken(String),
    UnsubscribeToken,
    SubscribeAccounts(Vec<String>),
    UnsubscribeAccounts(Vec<String>),
    Shutdown,
}

/// What the service wants to be subscribed to, independent of connection
/// state. Mutations return the frames to send right now (empty while
/// disconnected is fine; the set is replayed on the next connect).
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    token: Option<String>,
    accounts: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames that reproduce the whole desired set on a fresh connection.
    pub fn replay_frames(&self) -> Vec<String> {
        let mut frames = Vec::new();
        if let Some(mint) = &self.token {
            frames.push(frame(SUBSCRIBE_TOKEN_TRADE, std::slice::from_ref(mint)));
        }
        if !self.accounts.is_empty() {
            let keys: Vec<String> = self.accounts.iter().cloned().collect();
            frames.push(frame(SUBSCRIBE_ACCOUNT_TRADE, &keys));
        }
        frames
    }

    /// Apply one command to the desired set, returning the frames that
    /// bring a live connection in line with it.
    pub fn apply(&mut self, cmd: &FeedCommand) -> Vec<String> {
        match cmd {
            FeedCommand::SubscribeToken(mint) => {
                let mut frames = Vec::new();
                if let Some(old) = self.token.take() {
                    if old != *mint {
                        frames.push(frame(UNSUBSCRIBE_TOKEN_TRADE, &[old]));
                    }
                }
                frames.push(frame(SUBSCRIBE_TOKEN_TRADE, std::slice::from_ref(mint)));
                self.token = Some(mint.clone());
                frames
            }
            FeedCommand::UnsubscribeToken => match self.token.take() {
                Some(old) => vec![frame(UNSUBSCRIBE_TOKEN_TRADE, &[old])],
                None => vec![],
            },
            FeedCommand::SubscribeAccounts(addrs) => {
                let added: Vec<String> = addrs
                    .iter()
                    .filter(|a| self.accounts.insert((*a).clone()))
                    .cloned()
                    .collect();
                if added.is_empty() {
                    vec![]
                } else {
                    vec![frame(SUBSCRIBE_ACCOUNT_TRADE, &added)]
                }
            }
            FeedCommand::UnsubscribeAccounts(addrs) => {
                let removed: Vec<String> = addrs
                    .iter()
                    .filter(|a| self.accounts.remove(*a))
                    .cloned()
                    .collect();
                if removed.is_empty() {
                    vec![]
                } else {
                    vec![frame(UNSUBSCRIBE_ACCOUNT_TRADE, &removed)]
                }
            }
            FeedCommand::Shutdown => vec![],
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let f = frame(SUBSCRIBE_TOKEN_TRADE, &["MINT1".to_string()]);
        let parsed: serde_json::Value = serde_json::from_str(&f).unwrap();
        assert_eq!(parsed["method"], "subscribeTokenTrade");
        assert_eq!(parsed["keys"][0], "MINT1");
    }

    #[test]
    fn test_replay_reproduces_desired_set() {
        let mut subs = SubscriptionSet::new();
        subs.apply(&FeedCommand::SubscribeToken("MINT1".to_string()));
        subs.apply(&FeedCommand::SubscribeAccounts(vec![
            "W1".to_string(),
            "W2".to_string(),
        ]));

        let frames = subs.replay_frames();
        assert_eq!(frames.len(), 2);
        let token: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(token["method"], "subscribeTokenTrade");
        let accounts: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(accounts["keys"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_token_switch_unsubscribes_old() {
        let mut subs = SubscriptionSet::new();
        subs.apply(&FeedCommand::SubscribeToken("OLD".to_string()));

        let frames = subs.apply(&FeedCommand::SubscribeToken("NEW".to_string()));
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("unsubscribeTokenTrade"));
        assert!(frames[0].contains("OLD"));
        assert!(frames[1].contains("subscribeTokenTrade"));
        assert!(frames[1].contains("NEW"));
        assert_eq!(subs.token(), Some("NEW"));
    }

    #[test]
    fn test_resubscribing_same_token_sends_no_unsubscribe() {
        let mut subs = SubscriptionSet::new();
        subs.apply(&FeedCommand::SubscribeToken("MINT1".to_string()));
        let frames = subs.apply(&FeedCommand::SubscribeToken("MINT1".to_string()));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("subscribeTokenTrade"));
    }

    #[test]
    fn test_account_dedup_and_removal() {
        let mut subs = SubscriptionSet::new();
        let frames = subs.apply(&FeedCommand::SubscribeAccounts(vec![
            "W1".to_string(),
            "W1".to_string(),
            "W2".to_string(),
        ]));
        assert_eq!(frames.len(), 1);
        assert_eq!(subs.account_count(), 2);

        // Already-subscribed accounts produce no frame
        let frames = subs.apply(&FeedCommand::SubscribeAccounts(vec!["W2".to_string()]));
        assert!(frames.is_empty());

        let frames = subs.apply(&FeedCommand::UnsubscribeAccounts(vec![
            "W2".to_string(),
            "UNKNOWN".to_string(),
        ]));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("unsubscribeAccountTrade"));
        assert_eq!(subs.account_count(), 1);
    }

    #[test]
    fn test_unsubscribe_token_when_none_is_silent() {
        let mut subs = SubscriptionSet::new();
        assert!(subs.apply(&FeedCommand::UnsubscribeToken).is_empty());
    }
}
