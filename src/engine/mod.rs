//! Auto-sell engine: trigger state machine, runtime state persistence,
//! and the trigger decision CSV log.

pub mod auto_sell;
pub mod logging;
pub mod state;

pub use auto_sell::{
    AutoSellEngine, DryRunExecutor, EngineEvent, MevParams, SellExecutor, SellResult, SellState,
    WalletSellConfig,
};
pub use logging::{TriggerEvent, TriggerLogEntry, TriggerLogger};
pub use state::{EngineStateFile, EnvOverrides};
