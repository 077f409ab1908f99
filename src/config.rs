//! Dashboard configuration: TOML file, environment overrides, defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::synthetic::SyntheticConfig;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "esf-dashboard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Files to open at startup
    pub data: DataConfig,

    /// Demo data used when no file is given
    pub synthetic: SyntheticConfig,

    /// Display settings
    pub display: DisplayConfig,

    /// Memoization of filter / aggregate results
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// Visit table (.csv / .json / .parquet)
    pub path: Option<PathBuf>,

    /// Population per unit (columns `unidade`, `pop_adscrita`)
    pub population_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Rows in the physician ranking chart
    pub top_n: usize,

    /// Categorical columns with more distinct values get no multiselect
    pub max_filter_values: usize,

    /// Suggested name in the export dialog
    pub export_file_name: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            top_n: 15,
            max_filter_values: 50,
            export_file_name: "esf_dados_filtrados.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept per cache (filtered datasets, aggregates)
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { capacity: 64 }
    }
}

impl DashboardConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Explicit file, else `esf-dashboard.toml` if present, else defaults;
    /// environment overrides applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("ESF_DATA_PATH") {
            self.data.path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("ESF_POPULATION_PATH") {
            self.data.population_path = Some(PathBuf::from(path));
        }
        if let Some(n) = var("ESF_TOP_N").and_then(|v| v.parse().ok()) {
            self.display.top_n = n;
        }
        if let Some(seed) = var("ESF_SEED").and_then(|v| v.parse().ok()) {
            self.synthetic.seed = seed;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.display.top_n == 0 {
            bail!("display.top_n must be > 0");
        }
        if self.display.max_filter_values == 0 {
            bail!("display.max_filter_values must be > 0");
        }
        if self.synthetic.months == 0 {
            bail!("synthetic.months must be > 0");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: DashboardConfig = toml::from_str(
            r#"
            [display]
            top_n = 5

            [synthetic]
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.display.top_n, 5);
        assert_eq!(config.display.max_filter_values, 50);
        assert_eq!(config.synthetic.seed, 42);
        assert_eq!(config.synthetic.months, 12);
        assert!(config.data.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = DashboardConfig::default();
        config.apply_overrides(|key| match key {
            "ESF_TOP_N" => Some("3".to_string()),
            "ESF_DATA_PATH" => Some("visits.csv".to_string()),
            "ESF_SEED" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.display.top_n, 3);
        assert_eq!(config.data.path, Some(PathBuf::from("visits.csv")));
        assert_eq!(config.synthetic.seed, SyntheticConfig::default().seed);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = DashboardConfig::default();
        config.display.top_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esf.toml");
        std::fs::write(&path, "[cache]\ncapacity = 4\n").unwrap();
        let config = DashboardConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.cache.capacity, 4);
    }
}
