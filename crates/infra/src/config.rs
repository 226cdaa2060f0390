//! Engine configuration.
//!
//! Loaded from an optional JSON file named by `FORGEREV_CONFIG`, then
//! overridden field by field from `FORGEREV_DAY_COUNT` and
//! `FORGEREV_VERSION_RETRIES`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use forgerev_recognition::DayCountConvention;

pub const CONFIG_PATH_ENV: &str = "FORGEREV_CONFIG";
pub const DAY_COUNT_ENV: &str = "FORGEREV_DAY_COUNT";
pub const VERSION_RETRIES_ENV: &str = "FORGEREV_VERSION_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Weighting of ratable buckets.
    pub day_count: DayCountConvention,
    /// Re-reads allowed after a stale contract revision before `VersionConflict` surfaces.
    pub version_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            day_count: DayCountConvention::ActualActual,
            version_conflict_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        if let Some(raw) = lookup(DAY_COUNT_ENV) {
            config.day_count = raw
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {DAY_COUNT_ENV}"))?;
        }
        if let Some(raw) = lookup(VERSION_RETRIES_ENV) {
            config.version_conflict_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {VERSION_RETRIES_ENV}: '{raw}'"))?;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing engine config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.day_count, DayCountConvention::ActualActual);
        assert_eq!(config.version_conflict_retries, 3);
    }

    #[test]
    fn environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("forgerev-config-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, r#"{"day_count":"thirty_360","version_conflict_retries":7}"#).unwrap();
        let path_str = path.to_string_lossy().to_string();

        let from_file = EngineConfig::from_lookup(lookup(&[(CONFIG_PATH_ENV, &path_str)])).unwrap();
        assert_eq!(from_file.day_count, DayCountConvention::Thirty360);
        assert_eq!(from_file.version_conflict_retries, 7);

        let overridden = EngineConfig::from_lookup(lookup(&[
            (CONFIG_PATH_ENV, &path_str),
            (DAY_COUNT_ENV, "actual/actual"),
            (VERSION_RETRIES_ENV, "1"),
        ]))
        .unwrap();
        assert_eq!(overridden.day_count, DayCountConvention::ActualActual);
        assert_eq!(overridden.version_conflict_retries, 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn bad_values_carry_context() {
        let err = EngineConfig::from_lookup(lookup(&[(VERSION_RETRIES_ENV, "many")])).unwrap_err();
        assert!(format!("{err:#}").contains(VERSION_RETRIES_ENV));

        let err = EngineConfig::from_lookup(lookup(&[(CONFIG_PATH_ENV, "/nonexistent/forgerev.json")])).unwrap_err();
        assert!(format!("{err:#}").contains("reading engine config"));
    }
}
