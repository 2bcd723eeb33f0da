//! TOML-based application configuration.
//!
//! Stores the policy values that drive the engine:
//! - Release threshold and skip grace period
//! - Reminder offsets
//! - Coverage lookback
//! - Local clock offset used for day boundaries
//!
//! Configuration is stored at `~/.config/vigil/config.toml`.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, CoreError, Result};
use crate::slot::SlotPolicy;
use crate::time::offset_from_minutes;

/// Longest accepted skip grace period, in days.
pub const MAX_SKIP_GRACE_DAYS: u32 = 3650;
/// Longest accepted coverage lookback, in days.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

/// Slot lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_five")]
    pub release_threshold: u32,
    #[serde(default = "default_five")]
    pub skip_grace_days: u32,
}

/// Reminder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minutes before the window start.
    #[serde(default = "default_offsets")]
    pub offsets_minutes: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Minutes east of UTC for local day boundaries.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/vigil/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

// Default functions
fn default_five() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_offsets() -> Vec<u32> {
    vec![60, 30, 15]
}
fn default_lookback_days() -> u32 {
    30
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            release_threshold: default_five(),
            skip_grace_days: default_five(),
        }
    }
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offsets_minutes: default_offsets(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as integer")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let load_failed = |message: String| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
        let cfg: Config = toml::from_str(&content).map_err(|e| load_failed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Update a value in memory without saving. Rejects unknown keys and
    /// values that would fail validation.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.release_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "policy.release_threshold".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.policy.skip_grace_days > MAX_SKIP_GRACE_DAYS {
            return Err(ConfigError::InvalidValue {
                key: "policy.skip_grace_days".into(),
                message: format!("must be at most {MAX_SKIP_GRACE_DAYS}"),
            });
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.coverage.lookback_days) {
            return Err(ConfigError::InvalidValue {
                key: "coverage.lookback_days".into(),
                message: format!("must be between 1 and {MAX_LOOKBACK_DAYS}"),
            });
        }
        if offset_from_minutes(self.clock.utc_offset_minutes).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "clock.utc_offset_minutes".into(),
                message: "must be within +/- 24 hours".into(),
            });
        }
        if self.watch.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "watch.tick_ms".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn slot_policy(&self) -> SlotPolicy {
        SlotPolicy {
            release_threshold: self.policy.release_threshold,
            skip_grace_days: self.policy.skip_grace_days,
        }
    }

    /// Local clock offset. Falls back to UTC for an out-of-range value.
    pub fn utc_offset(&self) -> FixedOffset {
        offset_from_minutes(self.clock.utc_offset_minutes).unwrap_or_else(|| {
            tracing::warn!(
                minutes = self.clock.utc_offset_minutes,
                "invalid utc offset, using UTC"
            );
            Utc.fix()
        })
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e: CoreError| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.policy.release_threshold, 5);
        assert_eq!(parsed.reminders.offsets_minutes, vec![60, 30, 15]);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let parsed: Config = toml::from_str("[policy]\nskip_grace_days = 7\n").unwrap();
        assert_eq!(parsed.policy.skip_grace_days, 7);
        assert_eq!(parsed.policy.release_threshold, 5);
        assert_eq!(parsed.coverage.lookback_days, 30);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("policy.release_threshold").as_deref(), Some("5"));
        assert_eq!(cfg.get("reminders.enabled").as_deref(), Some("true"));
        assert!(cfg.get("policy.missing_key").is_none());
    }

    #[test]
    fn apply_updates_numbers_arrays_and_negative_offsets() {
        let mut cfg = Config::default();
        cfg.apply("policy.skip_grace_days", "7").unwrap();
        cfg.apply("reminders.offsets_minutes", "[45, 10]").unwrap();
        cfg.apply("clock.utc_offset_minutes", "-300").unwrap();
        assert_eq!(cfg.slot_policy().skip_grace_days, 7);
        assert_eq!(cfg.reminders.offsets_minutes, vec![45, 10]);
        assert_eq!(cfg.utc_offset().local_minus_utc(), -300 * 60);
    }

    #[test]
    fn apply_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply("policy.nonexistent", "1"),
            Err(CoreError::Config(ConfigError::UnknownKey(_)))
        ));
    }

    #[test]
    fn apply_rejects_invalid_values() {
        let mut cfg = Config::default();
        assert!(cfg.apply("reminders.enabled", "maybe").is_err());
        assert!(cfg.apply("policy.release_threshold", "0").is_err());
        assert!(cfg.apply("clock.utc_offset_minutes", "5000").is_err());
        assert_eq!(cfg.policy.release_threshold, 5);
    }

    #[test]
    fn apply_rejects_out_of_range_day_counts() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply("policy.skip_grace_days", "4294967295"),
            Err(CoreError::Config(ConfigError::InvalidValue { .. }))
        ));
        assert!(cfg.apply("coverage.lookback_days", "4294967295").is_err());
        assert!(cfg.apply("coverage.lookback_days", "0").is_err());

        cfg.apply("policy.skip_grace_days", "3650").unwrap();
        cfg.apply("coverage.lookback_days", "3650").unwrap();
        assert_eq!(cfg.policy.skip_grace_days, MAX_SKIP_GRACE_DAYS);
        assert_eq!(cfg.coverage.lookback_days, MAX_LOOKBACK_DAYS);
    }

    #[test]
    fn load_rejects_unbounded_skip_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policy]\nskip_grace_days = 100000\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(CoreError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn save_and_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.apply("coverage.lookback_days", "14").unwrap();
        cfg.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.coverage.lookback_days, 14);
    }
}
