// ABOUTME: Source configuration parsed from host-supplied key/value settings
// ABOUTME: Validates container name, polling period and page size before any producer starts

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SourceError};

pub const CONFIG_KEY_CONTAINER: &str = "container";
pub const CONFIG_KEY_POLLING_PERIOD: &str = "pollingPeriod";
pub const CONFIG_KEY_MAX_RESULTS: &str = "maxResults";

pub const DEFAULT_POLLING_PERIOD: &str = "1s";
pub const DEFAULT_MAX_RESULTS: u32 = 5000;

/// Number of listing entries requested per page, always within 1..=5000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize(u32);

impl PageSize {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 5000;

    pub fn new(value: u32) -> Result<Self> {
        if value < Self::MIN {
            return Err(SourceError::Config(format!(
                "page size must be greater than or equal to {}, got {}",
                Self::MIN,
                value
            )));
        }
        if value > Self::MAX {
            return Err(SourceError::Config(format!(
                "page size must not be greater than {}, got {}",
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(DEFAULT_MAX_RESULTS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the container to stream; for the local backend this is a directory path.
    pub container: String,
    /// How often the change producer polls for modifications.
    pub polling_period: Duration,
    /// Listing page size.
    pub max_results: PageSize,
}

impl Config {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            polling_period: Duration::from_secs(1),
            max_results: PageSize::default(),
        }
    }

    /// Parses and validates raw settings. Unknown keys are ignored.
    pub fn from_map(raw: &HashMap<String, String>) -> Result<Self> {
        let container = raw
            .get(CONFIG_KEY_CONTAINER)
            .map(|s| s.trim())
            .unwrap_or_default();
        if container.is_empty() {
            return Err(required_config_err(CONFIG_KEY_CONTAINER));
        }

        Ok(Self {
            container: container.to_string(),
            polling_period: parse_polling_period(raw)?,
            max_results: parse_max_results(raw)?,
        })
    }

    /// Reads the same keys from a flat TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = load_raw(path)?;
        Self::from_map(&raw)
    }
}

/// Reads a flat TOML table of settings. Non-string scalars are stringified so
/// `maxResults = 100` and `maxResults = "100"` behave the same.
pub fn load_raw(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        SourceError::Config(format!("failed to read config file {:?}: {}", path, err))
    })?;
    let table: toml::Table = toml::from_str(&contents).map_err(|err| {
        SourceError::Config(format!("failed to parse config file {:?}: {}", path, err))
    })?;

    let mut raw = HashMap::new();
    for (key, value) in table {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(SourceError::Config(format!(
                    "{:?} config value must be a scalar, got {}",
                    key,
                    other.type_str()
                )))
            }
        };
        raw.insert(key, value);
    }
    Ok(raw)
}

fn required_config_err(name: &str) -> SourceError {
    SourceError::Config(format!("{:?} config value must be set", name))
}

fn parse_polling_period(raw: &HashMap<String, String>) -> Result<Duration> {
    let value = match raw.get(CONFIG_KEY_POLLING_PERIOD) {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => DEFAULT_POLLING_PERIOD,
    };

    if value.starts_with('-') {
        return Err(SourceError::Config(format!(
            "{:?} config value should be positive, got {}",
            CONFIG_KEY_POLLING_PERIOD, value
        )));
    }
    let period = parse_duration(value).ok_or_else(|| {
        SourceError::Config(format!(
            "{:?} config value should be a valid duration",
            CONFIG_KEY_POLLING_PERIOD
        ))
    })?;
    if period.is_zero() {
        return Err(SourceError::Config(format!(
            "{:?} config value should be positive, got {}",
            CONFIG_KEY_POLLING_PERIOD, value
        )));
    }
    Ok(period)
}

fn parse_max_results(raw: &HashMap<String, String>) -> Result<PageSize> {
    let value = match raw.get(CONFIG_KEY_MAX_RESULTS) {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => return Ok(PageSize::default()),
    };

    let parsed: i64 = value.parse().map_err(|err| {
        SourceError::Config(format!(
            "failed to parse {:?} config value: {}",
            CONFIG_KEY_MAX_RESULTS, err
        ))
    })?;
    if parsed <= 0 {
        return Err(SourceError::Config(format!(
            "failed to parse {:?} config value: value must be greater than 0, {} provided",
            CONFIG_KEY_MAX_RESULTS, parsed
        )));
    }
    if parsed > i64::from(PageSize::MAX) {
        return Err(SourceError::Config(format!(
            "failed to parse {:?} config value: value must not be greater than {}, {} provided",
            CONFIG_KEY_MAX_RESULTS,
            PageSize::MAX,
            parsed
        )));
    }
    PageSize::new(parsed as u32)
}

/// Parses a human-readable duration such as "500ms", "30s", "15m" or "1h".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60 * 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else {
        (s.as_str(), 1000)
    };

    let num: u64 = num_str.trim().parse().ok()?;
    num.checked_mul(unit_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(15 * 60)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_map(&raw(&[("container", "bucket")])).unwrap();
        assert_eq!(cfg.container, "bucket");
        assert_eq!(cfg.polling_period, Duration::from_secs(1));
        assert_eq!(cfg.max_results.get(), 5000);
        assert_eq!(cfg, Config::new("bucket"));
    }

    #[test]
    fn test_all_values_parsed() {
        let cfg = Config::from_map(&raw(&[
            ("container", "bucket"),
            ("pollingPeriod", "250ms"),
            ("maxResults", "10"),
            ("nonExistentKey", "value"),
        ]))
        .unwrap();
        assert_eq!(cfg.polling_period, Duration::from_millis(250));
        assert_eq!(cfg.max_results.get(), 10);
    }

    #[test]
    fn test_rejections() {
        let cases: &[(&[(&str, &str)], &str)] = &[
            (&[("nonExistentKey", "value")], "\"container\" config value must be set"),
            (
                &[("container", "c"), ("pollingPeriod", "non-date format string")],
                "\"pollingPeriod\" config value should be a valid duration",
            ),
            (
                &[("container", "c"), ("pollingPeriod", "-1s")],
                "\"pollingPeriod\" config value should be positive, got -1s",
            ),
            (
                &[("container", "c"), ("pollingPeriod", "0s")],
                "\"pollingPeriod\" config value should be positive, got 0s",
            ),
            (
                &[("container", "c"), ("maxResults", "-1")],
                "failed to parse \"maxResults\" config value: value must be greater than 0, -1 provided",
            ),
            (
                &[("container", "c"), ("maxResults", "0")],
                "failed to parse \"maxResults\" config value: value must be greater than 0, 0 provided",
            ),
            (
                &[("container", "c"), ("maxResults", "5001")],
                "failed to parse \"maxResults\" config value: value must not be greater than 5000, 5001 provided",
            ),
        ];
        for (pairs, expected) in cases {
            let err = Config::from_map(&raw(pairs)).unwrap_err();
            assert_eq!(err.to_string(), format!("configuration error: {expected}"));
        }

        let err = Config::from_map(&raw(&[("container", "c"), ("maxResults", "many")])).unwrap_err();
        assert!(err.to_string().contains("failed to parse \"maxResults\""));
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(PageSize::new(0).is_err());
        assert!(PageSize::new(5001).is_err());
        assert_eq!(PageSize::new(1).unwrap().get(), 1);
        assert_eq!(PageSize::new(5000).unwrap().get(), 5000);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.toml");
        std::fs::write(
            &path,
            "container = \"bucket\"\npollingPeriod = \"2s\"\nmaxResults = 100\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.container, "bucket");
        assert_eq!(cfg.polling_period, Duration::from_secs(2));
        assert_eq!(cfg.max_results.get(), 100);

        std::fs::write(&path, "container = [1, 2]\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
