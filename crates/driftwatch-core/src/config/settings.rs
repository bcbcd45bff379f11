//! Operator-tunable settings persisted in the store's key/value table.
//!
//! The runner takes one snapshot per suite so every replicate of a run sees the
//! same values.

use crate::errors::SettingsError;
use crate::storage::RunRepository;
use chrono::NaiveTime;
use chrono_tz::Tz;

pub const CACHE_BUSTING: &str = "cache_busting";
pub const SCHEDULE_TIMES: &str = "schedule_times";
pub const TIMEZONE: &str = "timezone";
pub const TEMPERATURE: &str = "temperature";
pub const TOP_P: &str = "top_p";
pub const MAX_TOKENS: &str = "max_tokens";
pub const STORE_RAW_OUTPUTS: &str = "store_raw_outputs";

pub const KEYS: [&str; 7] = [
    CACHE_BUSTING,
    SCHEDULE_TIMES,
    TIMEZONE,
    TEMPERATURE,
    TOP_P,
    MAX_TOKENS,
    STORE_RAW_OUTPUTS,
];

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSettings {
    /// Append a nonce to every prompt so upstream caches never answer.
    pub cache_busting: bool,
    pub schedule_times: Vec<NaiveTime>,
    pub timezone: Tz,
    pub temperature: f64,
    pub top_p: f64,
    /// Token budget for performance prompts.
    pub max_tokens: u32,
    pub store_raw_outputs: bool,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            cache_busting: false,
            schedule_times: vec![
                NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
            ],
            timezone: Tz::UTC,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1024,
            store_raw_outputs: false,
        }
    }
}

impl OperatorSettings {
    /// Validates and applies one key. The struct is untouched on error.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let value = value.trim();
        match key {
            CACHE_BUSTING => self.cache_busting = parse_bool(key, value)?,
            STORE_RAW_OUTPUTS => self.store_raw_outputs = parse_bool(key, value)?,
            SCHEDULE_TIMES => self.schedule_times = parse_schedule_times(value)?,
            TIMEZONE => {
                self.timezone = value
                    .parse::<Tz>()
                    .map_err(|_| SettingsError::invalid(key, "expected an IANA timezone name"))?
            }
            TEMPERATURE => self.temperature = parse_unit_interval(key, value)?,
            TOP_P => self.top_p = parse_unit_interval(key, value)?,
            MAX_TOKENS => {
                let n: u32 = value
                    .parse()
                    .map_err(|_| SettingsError::invalid(key, "expected a positive integer"))?;
                if n == 0 {
                    return Err(SettingsError::invalid(key, "must be >= 1"));
                }
                self.max_tokens = n;
            }
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, SettingsError> {
        let v = match key {
            CACHE_BUSTING => self.cache_busting.to_string(),
            STORE_RAW_OUTPUTS => self.store_raw_outputs.to_string(),
            SCHEDULE_TIMES => format_schedule_times(&self.schedule_times),
            TIMEZONE => self.timezone.name().to_string(),
            TEMPERATURE => self.temperature.to_string(),
            TOP_P => self.top_p.to_string(),
            MAX_TOKENS => self.max_tokens.to_string(),
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        };
        Ok(v)
    }

    pub fn entries(&self) -> Vec<(&'static str, String)> {
        KEYS.iter()
            .map(|k| (*k, self.get(k).unwrap_or_default()))
            .collect()
    }

    /// Builds settings from stored rows. Rows that no longer parse fall back to
    /// the default for that key.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut s = Self::default();
        for (key, value) in entries {
            if let Err(e) = s.apply(&key, &value) {
                tracing::warn!(key = %key, error = %e, "ignoring stored setting");
            }
        }
        s
    }

    pub async fn load(repo: &dyn RunRepository) -> anyhow::Result<Self> {
        let rows = repo.list_config().await?;
        Ok(Self::from_entries(rows))
    }

    /// Validates `value` for `key`, then persists its normalized form.
    pub async fn save(repo: &dyn RunRepository, key: &str, value: &str) -> anyhow::Result<String> {
        let mut scratch = Self::default();
        scratch.apply(key, value)?;
        let normalized = scratch.get(key)?;
        repo.set_config(key, &normalized).await?;
        tracing::info!(key = %key, value = %normalized, "setting updated");
        Ok(normalized)
    }

    pub fn describe(key: &str) -> Option<&'static str> {
        match key {
            CACHE_BUSTING => Some("append a unique nonce to each prompt to defeat upstream caching"),
            SCHEDULE_TIMES => Some("comma-separated HH:MM list of daily run times"),
            TIMEZONE => Some("IANA timezone the schedule times are interpreted in"),
            TEMPERATURE => Some("sampling temperature sent with every call (0-1)"),
            TOP_P => Some("nucleus sampling parameter sent with every call (0-1)"),
            MAX_TOKENS => Some("max output tokens for performance prompts"),
            STORE_RAW_OUTPUTS => Some("persist raw model output next to its hash"),
            _ => None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::invalid(key, "expected true or false")),
    }
}

fn parse_unit_interval(key: &str, value: &str) -> Result<f64, SettingsError> {
    let v: f64 = value
        .parse()
        .map_err(|_| SettingsError::invalid(key, "expected a number"))?;
    if !(0.0..=1.0).contains(&v) {
        return Err(SettingsError::invalid(key, "must be between 0 and 1"));
    }
    Ok(v)
}

pub fn parse_schedule_times(value: &str) -> Result<Vec<NaiveTime>, SettingsError> {
    let mut times = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let t = NaiveTime::parse_from_str(part, "%H:%M").map_err(|_| {
            SettingsError::invalid(SCHEDULE_TIMES, format!("'{}' is not HH:MM", part))
        })?;
        times.push(t);
    }
    times.sort();
    times.dedup();
    Ok(times)
}

fn format_schedule_times(times: &[NaiveTime]) -> String {
    times
        .iter()
        .map(|t| t.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_entries() {
        let d = OperatorSettings::default();
        let rows = d
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<Vec<_>>();
        assert_eq!(OperatorSettings::from_entries(rows), d);
    }

    #[test]
    fn schedule_times_are_sorted_and_deduplicated() {
        let mut s = OperatorSettings::default();
        s.apply(SCHEDULE_TIMES, "21:30, 06:05,21:30").unwrap();
        assert_eq!(s.get(SCHEDULE_TIMES).unwrap(), "06:05,21:30");
    }

    #[test]
    fn rejects_bad_values_without_mutating() {
        let mut s = OperatorSettings::default();
        assert_eq!(
            s.apply(TEMPERATURE, "1.5"),
            Err(SettingsError::invalid(TEMPERATURE, "must be between 0 and 1"))
        );
        assert!(s.apply(SCHEDULE_TIMES, "25:00").is_err());
        assert!(s.apply(TIMEZONE, "Mars/Olympus").is_err());
        assert!(s.apply(MAX_TOKENS, "0").is_err());
        assert!(matches!(
            s.apply("colour", "blue"),
            Err(SettingsError::UnknownKey(_))
        ));
        assert_eq!(s, OperatorSettings::default());
    }

    #[test]
    fn parses_booleans_and_timezones() {
        let mut s = OperatorSettings::default();
        s.apply(CACHE_BUSTING, "on").unwrap();
        s.apply(TIMEZONE, "Europe/Amsterdam").unwrap();
        assert!(s.cache_busting);
        assert_eq!(s.get(TIMEZONE).unwrap(), "Europe/Amsterdam");
    }

    #[test]
    fn broken_stored_value_falls_back_to_default() {
        let s = OperatorSettings::from_entries(vec![
            (MAX_TOKENS.to_string(), "lots".to_string()),
            (TOP_P.to_string(), "0.9".to_string()),
        ]);
        assert_eq!(s.max_tokens, 1024);
        assert_eq!(s.top_p, 0.9);
    }
}
