//! Environment-driven configuration.
//!
//! All settings come from environment variables (an optional `.env` file is
//! loaded by the binary before this runs). A missing required value is a
//! startup failure, reported on stderr with a non-zero exit.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontier DSN, e.g. `postgres://user:pw@host/db`.
    pub postgres_url: String,
    /// Base frontier poll interval; actual sleeps are jittered around it.
    pub poll_interval: Duration,
    pub seed_urls: Vec<String>,
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    /// Search-index sink endpoints; empty means the stdout sink.
    pub sink_addresses: Vec<String>,
    pub sink_username: Option<String>,
    pub sink_password: Option<String>,
    pub log_level: String,
    /// Override for the stealth-browser server command line.
    pub browser_command: Option<String>,
    pub browser_port: u16,
    pub browser_ws_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let postgres_url = env::var("POSTGRES_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("POSTGRES_URL"))?;

        let poll_interval = match env::var("POLL_INTERVAL") {
            Ok(raw) => parse_duration(&raw).map_err(|reason| ConfigError::Invalid {
                name: "POLL_INTERVAL",
                value: raw,
                reason,
            })?,
            Err(_) => Duration::from_secs(6),
        };

        let browser_port = match env::var("BROWSER_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "BROWSER_PORT",
                value: raw,
                reason: "expected a port number".to_string(),
            })?,
            Err(_) => 9222,
        };

        Ok(Self {
            postgres_url,
            poll_interval,
            seed_urls: list_var("SEED_URLS"),
            proxy: opt_var("PROXY"),
            proxy_username: opt_var("PROXY_USERNAME"),
            proxy_password: opt_var("PROXY_PASSWORD"),
            sink_addresses: list_var("SINK_ADDRESSES"),
            sink_username: opt_var("SINK_USERNAME"),
            sink_password: opt_var("SINK_PASSWORD"),
            log_level: opt_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            browser_command: opt_var("BROWSER_COMMAND"),
            browser_port,
            browser_ws_path: opt_var("BROWSER_WS_PATH").unwrap_or_else(|| "play".to_string()),
        })
    }
}

fn opt_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parses durations of the form `250ms`, `6s`, `2m`, `1h`.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (number, unit) = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|idx| raw.split_at(idx))
        .ok_or_else(|| "missing time unit (ms, s, m, h)".to_string())?;

    let value: f64 = number
        .parse()
        .map_err(|_| format!("{number:?} is not a number"))?;

    let unit_ms = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => return Err(format!("unknown time unit {other:?}")),
    };

    Ok(Duration::from_millis((value * unit_ms) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_duration("6s").unwrap(), Duration::from_secs(6));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_unitless_and_garbage_durations() {
        assert!(parse_duration("6").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("6 parsecs").is_err());
    }
}
