use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use waitline_core::settings::{MAX_COOLDOWN_DAYS, MAX_GRACE_PERIOD_SECS};
use waitline_core::QueueSettings;

/// One hour.
const MAX_FLUSH_DEBOUNCE_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the three JSON snapshot files. Required.
    pub state_dir: PathBuf,
    pub port: u16,
    pub max_queue_size: usize,
    pub confirmation_grace: Duration,
    pub waitlist_cooldown_days: i64,
    /// How often the promotion loop runs.
    pub promotion_interval: Duration,
    /// Minimum spacing of routine (debounced) writes.
    pub flush_debounce: Duration,
    /// How often every store is written regardless of dirtiness.
    pub backup_interval: Duration,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number, got '{}'", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let state_dir = lookup("WAITLINE_STATE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .context("WAITLINE_STATE_DIR environment variable is required")?;

        let port = parse_or(&lookup, "PORT", 3000u16)?;

        let max_queue_size = parse_or(&lookup, "MAX_QUEUE_SIZE", 20usize)?;
        if max_queue_size == 0 {
            bail!("MAX_QUEUE_SIZE must be at least 1");
        }

        let grace_secs = parse_or(&lookup, "CONFIRMATION_GRACE_SECS", 300u64)?;
        if grace_secs > MAX_GRACE_PERIOD_SECS as u64 {
            bail!(
                "CONFIRMATION_GRACE_SECS must be at most {}, got {}",
                MAX_GRACE_PERIOD_SECS,
                grace_secs
            );
        }
        let confirmation_grace = Duration::from_secs(grace_secs);

        let waitlist_cooldown_days = parse_or(&lookup, "WAITLIST_COOLDOWN_DAYS", 30i64)?;
        if !(0..=MAX_COOLDOWN_DAYS).contains(&waitlist_cooldown_days) {
            bail!(
                "WAITLIST_COOLDOWN_DAYS must be between 0 and {}, got {}",
                MAX_COOLDOWN_DAYS,
                waitlist_cooldown_days
            );
        }
        let promotion_interval =
            Duration::from_secs(parse_or(&lookup, "PROMOTION_INTERVAL_SECS", 5u64)?.max(1));

        let debounce_ms = parse_or(&lookup, "FLUSH_DEBOUNCE_MS", 2000u64)?;
        if debounce_ms > MAX_FLUSH_DEBOUNCE_MS {
            bail!(
                "FLUSH_DEBOUNCE_MS must be at most {}, got {}",
                MAX_FLUSH_DEBOUNCE_MS,
                debounce_ms
            );
        }
        let flush_debounce = Duration::from_millis(debounce_ms);
        let backup_interval =
            Duration::from_secs(parse_or(&lookup, "BACKUP_INTERVAL_SECS", 30u64)?.max(1));

        Ok(Config {
            state_dir,
            port,
            max_queue_size,
            confirmation_grace,
            waitlist_cooldown_days,
            promotion_interval,
            flush_debounce,
            backup_interval,
        })
    }

    /// The subset the engine cares about.
    pub fn queue_settings(&self) -> Result<QueueSettings> {
        let grace_period = chrono::Duration::from_std(self.confirmation_grace)
            .context("confirmation grace period is out of range")?;
        Ok(QueueSettings {
            max_queue_size: self.max_queue_size,
            grace_period,
            cooldown_days: self.waitlist_cooldown_days,
        })
    }

    pub fn debounce(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.flush_debounce).context("flush debounce is out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("WAITLINE_STATE_DIR", "/tmp/state")]).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_queue_size, 20);
        assert_eq!(config.confirmation_grace, Duration::from_secs(300));
        assert_eq!(config.waitlist_cooldown_days, 30);
        assert_eq!(config.promotion_interval, Duration::from_secs(5));
        assert_eq!(config.flush_debounce, Duration::from_millis(2000));
        assert_eq!(config.backup_interval, Duration::from_secs(30));
        assert_eq!(config.queue_settings().unwrap(), QueueSettings::default());
    }

    #[test]
    fn test_state_dir_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("WAITLINE_STATE_DIR"));

        // Blank counts as missing
        assert!(config_from(&[("WAITLINE_STATE_DIR", "  ")]).is_err());
    }

    #[test]
    fn test_malformed_number_is_fatal() {
        let err = config_from(&[("WAITLINE_STATE_DIR", "."), ("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_zero_queue_size_rejected() {
        assert!(config_from(&[("WAITLINE_STATE_DIR", "."), ("MAX_QUEUE_SIZE", "0")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("WAITLINE_STATE_DIR", "."),
            ("MAX_QUEUE_SIZE", "2"),
            ("CONFIRMATION_GRACE_SECS", "60"),
            ("WAITLIST_COOLDOWN_DAYS", "7"),
        ])
        .unwrap();
        let settings = config.queue_settings().unwrap();
        assert_eq!(settings.max_queue_size, 2);
        assert_eq!(settings.grace_period, chrono::Duration::seconds(60));
        assert_eq!(settings.cooldown_days, 7);
    }

    #[test]
    fn test_out_of_range_durations_are_fatal() {
        let err = config_from(&[
            ("WAITLINE_STATE_DIR", "."),
            ("CONFIRMATION_GRACE_SECS", "10000000000000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("CONFIRMATION_GRACE_SECS"));

        let err = config_from(&[
            ("WAITLINE_STATE_DIR", "."),
            ("WAITLIST_COOLDOWN_DAYS", "1000000000000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("WAITLIST_COOLDOWN_DAYS"));
        assert!(config_from(&[("WAITLINE_STATE_DIR", "."), ("WAITLIST_COOLDOWN_DAYS", "-1")]).is_err());

        let err = config_from(&[
            ("WAITLINE_STATE_DIR", "."),
            ("FLUSH_DEBOUNCE_MS", "18446744073709551615"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("FLUSH_DEBOUNCE_MS"));
    }

    #[test]
    fn test_largest_accepted_values_are_usable() {
        let grace = MAX_GRACE_PERIOD_SECS.to_string();
        let cooldown = MAX_COOLDOWN_DAYS.to_string();
        let debounce = MAX_FLUSH_DEBOUNCE_MS.to_string();
        let config = config_from(&[
            ("WAITLINE_STATE_DIR", "."),
            ("CONFIRMATION_GRACE_SECS", grace.as_str()),
            ("WAITLIST_COOLDOWN_DAYS", cooldown.as_str()),
            ("FLUSH_DEBOUNCE_MS", debounce.as_str()),
        ])
        .unwrap();
        let settings = config.queue_settings().unwrap();
        assert_eq!(settings.grace_period, chrono::Duration::days(7));
        assert_eq!(config.debounce().unwrap(), chrono::Duration::hours(1));
    }
}
