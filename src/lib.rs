// Trade Tracker - launch trade ingestion and auto-sell engine
// Single service: one feed subscription, one processing path, one database

pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod fanout;
pub mod feed;
pub mod metrics;
pub mod normalizer;
pub mod server;
pub mod tracker;
pub mod types;
pub mod volume;
pub mod wallets;

pub use db::Database;
pub use tracker::{TrackerHandle, TradeTracker};
pub use types::{Trade, TradeSide, WalletRole};
