//! Environment configuration

use std::str::FromStr;

use crate::domain::value_objects::ReturnWindow;

#[derive(Clone, Debug)]
pub struct Config {
    /// No database URL means the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub nats_url: Option<String>,
    pub port: u16,
    pub workflow: WorkflowConfig,
}

/// Knobs of the return workflow itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub return_window: ReturnWindow,
    pub refund_voucher_valid_days: i64,
    pub refund_max_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self { Self { return_window: ReturnWindow::default(), refund_voucher_valid_days: 30, refund_max_attempts: 3 } }
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = WorkflowConfig::default();
        Ok(Self {
            database_url: get("DATABASE_URL").filter(|v| !v.is_empty()),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            nats_url: get("NATS_URL").filter(|v| !v.is_empty()),
            port: parse_or(&get, "PORT", 8083)?,
            workflow: WorkflowConfig {
                return_window: ReturnWindow::days(parse_or(&get, "RETURN_WINDOW_DAYS", defaults.return_window.length())?),
                refund_voucher_valid_days: parse_or(&get, "REFUND_VOUCHER_VALID_DAYS", defaults.refund_voucher_valid_days)?,
                refund_max_attempts: parse_or(&get, "REFUND_MAX_ATTEMPTS", defaults.refund_max_attempts)?.max(1),
            },
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
