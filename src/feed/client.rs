//! 📡 Feed connection manager
//!
//! Owns the upstream websocket for its whole life: connect, replay the
//! desired subscriptions, pump frames, heartbeat, reconnect with capped
//! exponential backoff, forever. Raw text frames are handed to the
//! ingestion path untouched; this task never interprets trades.
//!
//! Subscription changes arrive through a `FeedHandle` and only ever edit
//! the desired set, so asking for a token while the socket is down is not
//! an error. The next successful connect replays everything.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::FeedConfig;
use crate::feed::messages::{FeedCommand, SubscriptionSet};
use crate::metrics;

/// A connection is declared dead after this many silent heartbeat periods.
const LIVENESS_MULTIPLIER: u32 = 3;

/// Backoff growth factor between reconnect attempts.
const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("websocket stream failed: {0}")]
    Stream(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("feed silent for {0} seconds, forcing reconnect")]
    Stale(u64),
}

/// Cloneable control surface for the feed task.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    pub fn subscribe_token(&self, mint: &str) {
        self.send(FeedCommand::SubscribeToken(mint.to_string()));
    }

    pub fn unsubscribe_token(&self) {
        self.send(FeedCommand::UnsubscribeToken);
    }

    pub fn subscribe_accounts(&self, addrs: Vec<String>) {
        if !addrs.is_empty() {
            self.send(FeedCommand::SubscribeAccounts(addrs));
        }
    }

    pub fn unsubscribe_accounts(&self, addrs: Vec<String>) {
        if !addrs.is_empty() {
            self.send(FeedCommand::UnsubscribeAccounts(addrs));
        }
    }

    pub fn shutdown(&self) {
        self.send(FeedCommand::Shutdown);
    }

    fn send(&self, cmd: FeedCommand) {
        if self.commands.send(cmd).is_err() {
            warn!("⚠️ Feed task is gone, command dropped");
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

pub struct FeedClient {
    config: FeedConfig,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    subs: SubscriptionSet,
    events: mpsc::UnboundedSender<String>,
    attempt: u32,
}

/// Spawn the feed task. Returns the control handle, the raw frame stream
/// for the ingestion path, and the task handle for shutdown joins.
pub fn spawn_feed(
    config: FeedConfig,
) -> (
    FeedHandle,
    mpsc::UnboundedReceiver<String>,
    tokio::task::JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let client = FeedClient {
        config,
        commands: cmd_rx,
        subs: SubscriptionSet::new(),
        events: event_tx,
        attempt: 0,
    };

    let handle = FeedHandle { commands: cmd_tx };
    let task = tokio::spawn(client.run());
    (handle, event_rx, task)
}

impl FeedClient {
    async fn run(mut self) {
        info!("📡 Feed client starting: {}", self.config.endpoint);

        loop {
            match self.session().await {
                Ok(SessionEnd::Shutdown) => {
                    info!("📡 Feed client shut down");
                    metrics::set_feed_connected(false);
                    return;
                }
                Ok(SessionEnd::Lost) => {
                    warn!("⚠️ Feed connection closed, reconnecting...");
                }
                Err(e) => {
                    error!("❌ Feed error: {:#}", e);
                }
            }

            metrics::set_feed_connected(false);
            let delay = backoff_delay(
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
                self.attempt,
            );
            self.attempt = self.attempt.saturating_add(1);
            info!("🔄 Reconnecting in {}ms (attempt {})", delay.as_millis(), self.attempt);

            if self.wait_through(delay).await {
                info!("📡 Feed client shut down");
                return;
            }
        }
    }

    /// Sleep out the backoff while still folding commands into the desired
    /// set. Returns true on shutdown.
    async fn wait_through(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                cmd = self.commands.recv() => match cmd {
                    None | Some(FeedCommand::Shutdown) => return true,
                    Some(cmd) => {
                        // Offline: frames are discarded, the set remembers
                        let _ = self.subs.apply(&cmd);
                    }
                }
            }
        }
    }

    /// One full connection: connect, replay, pump until it dies.
    async fn session(&mut self) -> Result<SessionEnd> {
        let (ws_stream, _) = connect_async(&self.config.endpoint)
            .await
            .map_err(FeedError::Connect)
            .context("Failed to connect to feed")?;

        info!("✅ Feed connected");
        self.attempt = 0;
        metrics::set_feed_connected(true);
        metrics::inc_feed_reconnects();

        let (mut write, mut read) = ws_stream.split();

        let replay = self.subs.replay_frames();
        let replay_count = replay.len();
        for frame in replay {
            write
                .send(Message::Text(frame))
                .await
                .map_err(FeedError::Stream)
                .context("Failed to replay subscription")?;
        }
        if replay_count > 0 {
            info!("📡 Replayed {} subscription frame(s)", replay_count);
        }

        let heartbeat = Duration::from_secs(self.config.heartbeat_interval_secs);
        let liveness = heartbeat * LIVENESS_MULTIPLIER;
        let mut ping_timer = interval(heartbeat);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first tick would ping before anything arrived
        ping_timer.reset();
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        if self.events.send(text).is_err() {
                            // Ingestion is gone; nothing left to feed
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_inbound = Instant::now();
                        debug!("📶 Ping received, answering");
                        write
                            .send(Message::Pong(data))
                            .await
                            .map_err(FeedError::Stream)?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                        debug!("📶 Pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Feed closed by server");
                        return Ok(SessionEnd::Lost);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(FeedError::Stream(e).into()),
                    None => return Ok(SessionEnd::Lost),
                },

                _ = ping_timer.tick() => {
                    if last_inbound.elapsed() >= liveness {
                        return Err(FeedError::Stale(liveness.as_secs()).into());
                    }
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(FeedError::Stream)?;
                    debug!("📶 Ping sent");
                }

                cmd = self.commands.recv() => match cmd {
                    None | Some(FeedCommand::Shutdown) => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                    Some(cmd) => {
                        for frame in self.subs.apply(&cmd) {
                            write
                                .send(Message::Text(frame))
                                .await
                                .map_err(FeedError::Stream)
                                .context("Failed to send subscription")?;
                        }
                    }
                }
            }
        }
    }
}

/// base * 1.5^attempt, capped.
fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let delay = (base_ms as f64) * BACKOFF_FACTOR.powi(attempt.min(60) as i32);
    Duration::from_millis(delay.min(max_ms as f64) as u64)
}
