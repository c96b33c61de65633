//! 📝 Trigger decision log
//!
//! Every auto-sell engine decision lands as one CSV row: arming,
//! triggering, cancellation, cooldown deferrals, sell outcomes, front-run
//! latches and resets. The file is append-only and survives restarts.

use anyhow::{Context, Result};
use log::info;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What happened, one word per row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerEvent {
    Armed,
    Triggered,
    Cancelled,
    CooldownDeferred,
    SellOk,
    SellFailed,
    FrontRun,
    Reset,
    Disabled,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Armed => "armed",
            TriggerEvent::Triggered => "triggered",
            TriggerEvent::Cancelled => "cancelled",
            TriggerEvent::CooldownDeferred => "cooldown_deferred",
            TriggerEvent::SellOk => "sell_ok",
            TriggerEvent::SellFailed => "sell_failed",
            TriggerEvent::FrontRun => "front_run",
            TriggerEvent::Reset => "reset",
            TriggerEvent::Disabled => "disabled",
        }
    }
}

/// One row in the trigger log.
#[derive(Debug, Clone)]
pub struct TriggerLogEntry {
    pub timestamp_ms: u64,
    pub event: TriggerEvent,
    pub mint: String,
    /// Empty for mint-level events (front-run, reset, disabled).
    pub wallet: String,
    pub threshold_sol: f64,
    pub net_sol: f64,
    pub detail: String,
}

impl TriggerLogEntry {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.6},{:.6},{},{}",
            self.timestamp_ms,
            self.event.as_str(),
            self.mint,
            self.wallet,
            self.threshold_sol,
            self.net_sol,
            // Free text must not break the column layout
            self.detail.replace(',', ";"),
            chrono::DateTime::from_timestamp_millis(self.timestamp_ms as i64)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default()
        )
    }

    pub fn csv_header() -> &'static str {
        "timestamp_ms,event,mint,wallet,threshold_sol,net_sol,detail,datetime"
    }
}

/// Trigger logger that appends to a CSV file.
pub struct TriggerLogger {
    log_file: Arc<Mutex<File>>,
    entries_logged: Arc<Mutex<u64>>,
}

impl TriggerLogger {
    /// Open the log, creating it with a header when missing.
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let path = log_path.as_ref();
        let file_exists = path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Failed to open trigger log: {:?}", path))?;

        if !file_exists {
            writeln!(file, "{}", TriggerLogEntry::csv_header())
                .context("Failed to write CSV header")?;
            file.flush()?;
            info!("📝 Created new trigger log: {:?}", path);
        } else {
            info!("📝 Opened existing trigger log: {:?}", path);
        }

        Ok(Self {
            log_file: Arc::new(Mutex::new(file)),
            entries_logged: Arc::new(Mutex::new(0)),
        })
    }

    pub fn log(&self, entry: TriggerLogEntry) -> Result<()> {
        {
            let mut file = self.log_file.lock().unwrap();
            writeln!(file, "{}", entry.to_csv_row()).context("Failed to write trigger log entry")?;
            file.flush()?;
        }
        *self.entries_logged.lock().unwrap() += 1;
        Ok(())
    }

    pub fn entries_logged(&self) -> u64 {
        *self.entries_logged.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_entry(event: TriggerEvent) -> TriggerLogEntry {
        TriggerLogEntry {
            timestamp_ms: 1_700_000_000_000,
            event,
            mint: "MINT1".to_string(),
            wallet: "WALLET1".to_string(),
            threshold_sol: 5.0,
            net_sol: 5.25,
            detail: "net 5.25 >= 5.00".to_string(),
        }
    }

    #[test]
    fn test_csv_header() {
        let header = TriggerLogEntry::csv_header();
        assert!(header.contains("event"));
        assert!(header.contains("threshold_sol"));
        assert!(header.contains("net_sol"));
    }

    #[test]
    fn test_csv_row_format() {
        let row = sample_entry(TriggerEvent::Triggered).to_csv_row();
        assert!(row.contains("triggered"));
        assert!(row.contains("5.000000"));
        assert!(row.contains("2023-11-14"));
    }

    #[test]
    fn test_detail_commas_are_sanitized() {
        let mut entry = sample_entry(TriggerEvent::SellFailed);
        entry.detail = "rpc error, retry later".to_string();
        let row = entry.to_csv_row();
        assert_eq!(row.matches(',').count(), 7);
        assert!(row.contains("rpc error; retry later"));
    }

    #[test]
    fn test_logger_creates_file_with_header() {
        let temp_path = "/tmp/test_trigger_log.csv";
        let _ = fs::remove_file(temp_path);

        let logger = TriggerLogger::new(temp_path).unwrap();
        logger.log(sample_entry(TriggerEvent::Armed)).unwrap();
        logger.log(sample_entry(TriggerEvent::Triggered)).unwrap();
        assert_eq!(logger.entries_logged(), 2);

        let content = fs::read_to_string(temp_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp_ms,"));
        assert!(lines[1].contains("armed"));
        assert!(lines[2].contains("triggered"));

        let _ = fs::remove_file(temp_path);
    }
}
