//! Back-office client for the store POS.
//!
//! Cash closing, sales analytics and inventory reports served by the store
//! backend. The library holds the failover HTTP client, the persisted
//! session and the cash-count form; the `backoffice-pos` binary drives them
//! from the command line.

pub mod api;
pub mod auth;
pub mod cash_count;
pub mod cli;
pub mod closing;
pub mod commands;
pub mod config;
pub mod db;
pub mod draft;
pub mod format;
pub mod logging;
pub mod reports;
pub mod session;
pub mod storage;
pub mod table;

use clap::Parser;
use tracing::info;

/// `version (git sha, built at)` for `--version` and logs.
pub const BUILD_INFO: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_SHA"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// First non-blank string among `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First numeric value among `keys`; numeric strings count (the backend
/// serializes decimals as strings on some endpoints).
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(f) = n.as_f64() {
                    return Some(f);
                }
            }
            Some(serde_json::Value::String(s)) => {
                if let Ok(f) = s.trim().parse::<f64>() {
                    if f.is_finite() {
                        return Some(f);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse arguments, set up logging and run one command.
pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let dev = cli.dev || logging::is_development();
    let _guard = logging::init(dev);
    info!("Starting backoffice-pos {BUILD_INFO}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::dispatch(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_helpers_pick_first_usable_key() {
        let v = json!({ "name": "  ", "label": "Caja 1", "total": "1500.50", "qty": 3 });
        assert_eq!(value_str(&v, &["name", "label"]).as_deref(), Some("Caja 1"));
        assert_eq!(value_f64(&v, &["missing", "total"]), Some(1500.5));
        assert_eq!(value_f64(&v, &["qty"]), Some(3.0));
        assert_eq!(value_f64(&v, &["label"]), None);
    }
}
