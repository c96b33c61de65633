//! Upstream trade feed: wire protocol and connection management.

pub mod client;
pub mod messages;

pub use client::{spawn_feed, FeedClient, FeedError, FeedHandle};
pub use messages::{FeedCommand, SubscriptionSet};
