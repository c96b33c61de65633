//! 🧪 Feed event normalization
//!
//! Converts loosely-shaped upstream JSON into the canonical `Trade` record.
//! Upstream field names drift between feed versions, so every field is
//! resolved through an ordered list of known aliases. Anything that is not
//! a buy or sell, or is missing a required field, is dropped with a log
//! line and can never panic the ingestion path.

use serde_json::Value;

use crate::types::{Trade, TradeSide};

/// Field aliases, tried in order. First hit wins.
const MINT_KEYS: &[&str] = &["mint", "tokenMint", "token"];
const TRADER_KEYS: &[&str] = &["traderPublicKey", "trader", "wallet", "account"];
const SOL_KEYS: &[&str] = &["solAmount", "sol_amount", "amountSol", "solSpent"];
const TOKEN_KEYS: &[&str] = &["tokenAmount", "token_amount", "newTokenBalance", "amount"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "blockTime"];
const SIGNATURE_KEYS: &[&str] = &["signature", "txSignature", "sig"];

/// Timestamps below this are seconds, not milliseconds.
const MS_EPOCH_FLOOR: f64 = 1e12;

/// Convert one raw feed event into a `Trade`.
///
/// Returns `None` for non-trade events (subscription acks, token creation,
/// migration notices) and for malformed trade events. Ownership fields are
/// left unclassified; the processing path enriches them against the wallet
/// registry so that registry rebuilds apply to trades parsed before them.
pub fn normalize(raw: &Value, received_at_ms: u64) -> Option<Trade> {
    let tx_type = match raw.get("txType").and_then(Value::as_str) {
        Some(t) => t,
        None => {
            log::debug!("📭 Ignoring feed message without txType");
            return None;
        }
    };

    let side = match tx_type {
        "buy" => TradeSide::Buy,
        "sell" => TradeSide::Sell,
        other => {
            log::debug!("📭 Ignoring non-trade event: txType={}", other);
            return None;
        }
    };

    let Some(mint) = string_field(raw, MINT_KEYS) else {
        log::warn!("⚠️ Dropping {} event without mint", tx_type);
        return None;
    };
    let Some(trader) = string_field(raw, TRADER_KEYS) else {
        log::warn!("⚠️ Dropping {} event without trader ({})", tx_type, short(&mint));
        return None;
    };

    let sol_amount = match number_field(raw, SOL_KEYS) {
        Some(v) if v > 0.0 => v,
        Some(v) => {
            log::warn!("⚠️ Dropping {} with non-positive SOL amount {} ({})", tx_type, v, short(&mint));
            return None;
        }
        None => {
            log::warn!("⚠️ Dropping {} without SOL amount ({})", tx_type, short(&mint));
            return None;
        }
    };

    // Token amount is informational; a missing value does not invalidate
    // the volume accounting.
    let token_amount = number_field(raw, TOKEN_KEYS).unwrap_or(0.0);

    let timestamp_ms = number_field(raw, TIMESTAMP_KEYS)
        .map(|ts| {
            if ts < MS_EPOCH_FLOOR {
                (ts * 1000.0) as u64
            } else {
                ts as u64
            }
        })
        .unwrap_or(received_at_ms);

    let signature = string_field(raw, SIGNATURE_KEYS).filter(|s| !s.is_empty());

    Some(Trade {
        mint,
        trader,
        side,
        sol_amount,
        token_amount,
        timestamp_ms,
        signature,
        is_own: false,
        owner_label: None,
        injected: false,
    })
}

/// First present string value among the aliases.
fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| raw.get(k).and_then(Value::as_str))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// First present numeric value among the aliases. Accepts JSON numbers and
/// numeric strings (some feed versions quote amounts).
fn number_field(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let v = raw.get(k)?;
        if let Some(n) = v.as_f64() {
            return Some(n);
        }
        v.as_str().and_then(|s| s.parse::<f64>().ok())
    })
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
    use serde_json::json;

    const RECEIVED_AT: u64 = 1_700_000_000_000;

    #[test]
    fn test_normalize_full_event() {
        let raw = json!({
            "txType": "buy",
            "mint": "So11111111111111111111111111111111111111112",
            "traderPublicKey": "TRADER111",
            "solAmount": 1.5,
            "tokenAmount": 35000.0,
            "timestamp": 1_700_000_001_234u64,
            "signature": "5xSig"
        });

        let trade = normalize(&raw, RECEIVED_AT).unwrap();
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.trader, "TRADER111");
        assert_eq!(trade.sol_amount, 1.5);
        assert_eq!(trade.timestamp_ms, 1_700_000_001_234);
        assert_eq!(trade.signature.as_deref(), Some("5xSig"));
        assert!(!trade.is_own);
        assert!(!trade.injected);
    }

    #[test]
    fn test_normalize_alias_fields() {
        let raw = json!({
            "txType": "sell",
            "tokenMint": "MINT111",
            "wallet": "TRADER222",
            "amountSol": "0.75",
            "amount": 12000.0
        });

        let trade = normalize(&raw, RECEIVED_AT).unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.mint, "MINT111");
        assert_eq!(trade.sol_amount, 0.75);
        // No timestamp in the event: local receive time is used
        assert_eq!(trade.timestamp_ms, RECEIVED_AT);
        assert!(trade.signature.is_none());
    }

    #[test]
    fn test_normalize_seconds_timestamp_upscaled() {
        let raw = json!({
            "txType": "buy",
            "mint": "MINT111",
            "trader": "TRADER333",
            "solAmount": 0.2,
            "blockTime": 1_700_000_123u64
        });

        let trade = normalize(&raw, RECEIVED_AT).unwrap();
        assert_eq!(trade.timestamp_ms, 1_700_000_123_000);
    }

    #[test]
    fn test_normalize_rejects_non_trade_events() {
        let create = json!({ "txType": "create", "mint": "MINT111" });
        assert!(normalize(&create, RECEIVED_AT).is_none());

        let ack = json!({ "message": "Successfully subscribed" });
        assert!(normalize(&ack, RECEIVED_AT).is_none());
    }

    #[test]
    fn test_normalize_rejects_malformed_trades() {
        let no_trader = json!({ "txType": "buy", "mint": "MINT111", "solAmount": 1.0 });
        assert!(normalize(&no_trader, RECEIVED_AT).is_none());

        let no_amount = json!({ "txType": "buy", "mint": "MINT111", "trader": "T1" });
        assert!(normalize(&no_amount, RECEIVED_AT).is_none());

        let zero_amount = json!({
            "txType": "sell", "mint": "MINT111", "trader": "T1", "solAmount": 0.0
        });
        assert!(normalize(&zero_amount, RECEIVED_AT).is_none());

        let garbage_amount = json!({
            "txType": "sell", "mint": "MINT111", "trader": "T1", "solAmount": "not-a-number"
        });
        assert!(normalize(&garbage_amount, RECEIVED_AT).is_none());
    }
}
