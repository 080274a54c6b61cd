//! alert_history - export stored alert and intrusion history as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use monitor_kernel::{now_ms, Alert, IntrusionFrame, MonitorStore, SqliteMonitorStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the monitor database.
    #[arg(long, default_value = "monitor.db", env = "MONITOR_DB_PATH")]
    db_path: String,
    /// Output file path, or `-` for stdout.
    #[arg(long, default_value = "alert_history.json")]
    output: String,
    /// Maximum records of each kind, newest first.
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Only alerts not yet acknowledged.
    #[arg(long)]
    unacknowledged: bool,
    /// Skip intrusion frames.
    #[arg(long)]
    no_intrusions: bool,
}

#[derive(Serialize)]
struct HistoryExport {
    exported_at_ms: u64,
    kernel_version: &'static str,
    alerts: Vec<Alert>,
    intrusions: Vec<IntrusionFrame>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.limit == 0 {
        return Err(anyhow!("--limit must be greater than zero"));
    }

    let mut store = SqliteMonitorStore::open(&args.db_path)?;
    let mut alerts = store.recent_alerts(args.limit)?;
    if args.unacknowledged {
        alerts.retain(|a| !a.acknowledged);
    }
    let intrusions = if args.no_intrusions {
        Vec::new()
    } else {
        store.recent_intrusions(args.limit)?
    };

    let export = HistoryExport {
        exported_at_ms: now_ms(),
        kernel_version: env!("CARGO_PKG_VERSION"),
        alerts,
        intrusions,
    };
    let json = serde_json::to_string_pretty(&export)?;
    if args.output == "-" {
        println!("{}", json);
    } else {
        std::fs::write(&args.output, json)
            .map_err(|e| anyhow!("failed to write {}: {}", args.output, e))?;
        log::info!(
            "exported {} alerts and {} intrusion frames to {}",
            export.alerts.len(),
            export.intrusions.len(),
            args.output
        );
    }
    Ok(())
}
