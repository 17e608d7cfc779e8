//! Engine configuration.
//!
//! Loaded in layers, later overriding earlier:
//! 1. Built-in defaults
//! 2. Global config: `~/.config/waitlist/config.toml`
//! 3. Project config: `./waitlist.toml`
//! 4. Explicit `--config` file
//! 5. Environment variables: `WAITLIST_*`
//!
//! CLI flags are applied by the binary on top of the result.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use waitlist_core::{Error, Result, DEFAULT_OFFER_TTL_SECS};

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://waitlist.db?mode=rwc";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an offer stays open, in seconds.
    pub offer_ttl_secs: u64,
    /// How often the reconciliation sweep runs, in seconds.
    pub sweep_interval_secs: u64,
    pub database_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offer_ttl_secs: DEFAULT_OFFER_TTL_SECS.unsigned_abs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// One config file. Absent keys leave the lower layer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub offer_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub database_url: Option<String>,
}

impl EngineConfig {
    /// Overlay `layer` onto this config.
    #[must_use]
    pub fn merge(self, layer: PartialConfig) -> Self {
        Self {
            offer_ttl_secs: layer.offer_ttl_secs.unwrap_or(self.offer_ttl_secs),
            sweep_interval_secs: layer.sweep_interval_secs.unwrap_or(self.sweep_interval_secs),
            database_url: layer.database_url.unwrap_or(self.database_url),
        }
    }

    /// Apply `WAITLIST_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a numeric variable does not parse.
    pub fn apply_env_from(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_secs = |name: &str| -> Result<Option<u64>> {
            lookup(name)
                .map(|value| {
                    value.trim().parse().map_err(|e| {
                        Error::InvalidConfig(format!("Invalid {name} value '{value}': {e}"))
                    })
                })
                .transpose()
        };

        let layer = PartialConfig {
            offer_ttl_secs: parse_secs("WAITLIST_OFFER_TTL_SECS")?,
            sweep_interval_secs: parse_secs("WAITLIST_SWEEP_INTERVAL_SECS")?,
            database_url: lookup("WAITLIST_DATABASE_URL"),
        };
        Ok(self.merge(layer))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a variable is malformed.
    pub fn apply_env_vars(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.offer_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "offer_ttl_secs must be greater than 0".into(),
            ));
        }
        if i64::try_from(self.offer_ttl_secs).is_err() {
            return Err(Error::InvalidConfig(format!(
                "offer_ttl_secs {} is too large",
                self.offer_ttl_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.database_url.trim().is_empty() {
            return Err(Error::InvalidConfig("database_url must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LOADING
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load configuration from every layer.
///
/// `explicit` is the `--config` path; unlike the global and project files it
/// must exist.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` if a file cannot be read, is malformed
/// TOML, or the merged values fail validation.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let config = EngineConfig::default();

    let config = match global_config_path().filter(|p| p.exists()) {
        Some(path) => config.merge(load_toml_file(&path)?),
        None => config,
    };

    let project = project_config_path();
    let config = if project.exists() {
        config.merge(load_toml_file(&project)?)
    } else {
        config
    };

    let config = match explicit {
        Some(path) => config.merge(load_toml_file(path)?),
        None => config,
    };

    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "waitlist")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path to the project config file in the working directory.
pub fn project_config_path() -> PathBuf {
    PathBuf::from("waitlist.toml")
}

/// Read one TOML layer.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` if the file cannot be read or parsed.
pub fn load_toml_file(path: &Path) -> Result<PartialConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.offer_ttl(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_only_overrides_present_keys() {
        let merged = EngineConfig::default().merge(PartialConfig {
            offer_ttl_secs: Some(60),
            ..PartialConfig::default()
        });
        assert_eq!(merged.offer_ttl_secs, 60);
        assert_eq!(merged.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(merged.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn test_env_overrides_file() -> Result<()> {
        let config = EngineConfig::default()
            .merge(PartialConfig {
                offer_ttl_secs: Some(60),
                ..PartialConfig::default()
            })
            .apply_env_from(env(&[
                ("WAITLIST_OFFER_TTL_SECS", "90"),
                ("WAITLIST_DATABASE_URL", "sqlite::memory:"),
            ]))?;
        assert_eq!(config.offer_ttl_secs, 90);
        assert_eq!(config.database_url, "sqlite::memory:");
        Ok(())
    }

    #[test]
    fn test_bad_env_value_is_invalid_config() {
        let result =
            EngineConfig::default().apply_env_from(env(&[("WAITLIST_SWEEP_INTERVAL_SECS", "soon")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = EngineConfig {
            offer_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_layer_parses() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let path = dir.path().join("waitlist.toml");
        std::fs::write(&path, "offer_ttl_secs = 120\nsweep_interval_secs = 5\n")
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let layer = load_toml_file(&path)?;
        assert_eq!(layer.offer_ttl_secs, Some(120));
        assert_eq!(layer.sweep_interval_secs, Some(5));
        assert_eq!(layer.database_url, None);
        Ok(())
    }

    #[test]
    fn test_unknown_key_rejected() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let path = dir.path().join("waitlist.toml");
        std::fs::write(&path, "offer_ttl = 120\n").map_err(|e| Error::InvalidConfig(e.to_string()))?;
        assert!(load_toml_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = load_config(Some(Path::new("/nonexistent/waitlist.toml")));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    #[serial]
    fn test_process_env_is_applied() -> Result<()> {
        std::env::set_var("WAITLIST_SWEEP_INTERVAL_SECS", "7");
        let result = EngineConfig::default().apply_env_vars();
        std::env::remove_var("WAITLIST_SWEEP_INTERVAL_SECS");
        assert_eq!(result?.sweep_interval_secs, 7);
        Ok(())
    }
}
