//! 📡 Trade fan-out
//!
//! One broadcast channel carries every accepted trade to however many
//! stream subscribers are attached. Sending never blocks the ingestion
//! path; a subscriber that falls behind lags or drops on its own without
//! touching anyone else.

use tokio::sync::broadcast;

use crate::types::Trade;

const CHANNEL_CAPACITY: usize = 1024;

pub struct TradeBroadcaster {
    tx: broadcast::Sender<Trade>,
}

impl TradeBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish one accepted trade. No subscribers is not an error.
    pub fn send(&self, trade: &Trade) {
        let _ = self.tx.send(trade.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Trade> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TradeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
