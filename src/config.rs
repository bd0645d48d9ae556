//! # Configuration Management Module
//!
//! Questo modulo gestisce la configurazione dei FileTask e del batch optimizer.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di ottimizzazione
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `cpu_workers`: Worker paralleli per la coda CPU (default: core disponibili)
//! - `io_workers`: Worker paralleli per la coda I/O (default: 2)
//! - `strip_metadata`: Rimuove metadata EXIF/chunk ancillari (default: true)
//! - `png_level`: Livello di ottimizzazione PNG 0-6 (default: 4)
//! - `dry_run`: Non sostituisce i file originali (default: false)
//! - `json_output`: Eventi JSON su stdout invece della progress bar
//! - `temp_dir`: Directory per i file candidati (default: accanto al sorgente)
//! - `disabled_strategies`: Strategie da non eseguire (es. `["pngcrush"]`)
//!
//! ## Esempio:
//! ```rust
//! use imageoptim_task::Config;
//!
//! let config = Config {
//!     cpu_workers: 8,
//!     png_level: 6,
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::worker::Strategy;

/// Configuration for file optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parallel jobs on the CPU queue
    pub cpu_workers: usize,
    /// Parallel jobs on the I/O queue
    pub io_workers: usize,
    /// Strip metadata while optimizing (camera photos always keep theirs)
    pub strip_metadata: bool,
    /// PNG optimization level (0-6)
    pub png_level: u8,
    /// Dry run - don't actually replace files
    pub dry_run: bool,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
    /// Where candidate outputs are written (None = next to the source file)
    pub temp_dir: Option<PathBuf>,
    /// Strategy names that must never run
    pub disabled_strategies: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            io_workers: 2,
            strip_metadata: true,
            png_level: 4,
            dry_run: false,
            json_output: false,
            temp_dir: None,
            disabled_strategies: Vec::new(),
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.cpu_workers == 0 {
            return Err(anyhow::anyhow!("Number of CPU workers must be greater than 0"));
        }

        if self.io_workers == 0 {
            return Err(anyhow::anyhow!("Number of I/O workers must be greater than 0"));
        }

        if self.png_level > 6 {
            return Err(anyhow::anyhow!("PNG level must be between 0 and 6"));
        }

        for name in &self.disabled_strategies {
            if Strategy::from_name(name).is_none() {
                return Err(anyhow::anyhow!("Unknown strategy in disabled_strategies: {}", name));
            }
        }

        if let Some(ref temp_dir) = self.temp_dir {
            if !temp_dir.is_dir() {
                return Err(anyhow::anyhow!("Temp path is not a directory: {}", temp_dir.display()));
            }
        }

        Ok(())
    }

    /// Whether a strategy has been switched off by the user
    pub fn is_disabled(&self, strategy: Strategy) -> bool {
        self.disabled_strategies
            .iter()
            .any(|name| name.eq_ignore_ascii_case(strategy.name()))
    }

    /// Default location of the config file (`<config dir>/imageoptim-task/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imageoptim-task").join("config.json"))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.cpu_workers = 0;
        assert!(config.validate().is_err());

        config.cpu_workers = 2;
        config.io_workers = 0;
        assert!(config.validate().is_err());

        config.io_workers = 1;
        config.png_level = 7;
        assert!(config.validate().is_err());

        config.png_level = 6;
        config.disabled_strategies = vec!["zopfli".to_string()];
        assert!(config.validate().is_err());

        config.disabled_strategies = vec!["PNGCRUSH".to_string()];
        assert!(config.validate().is_ok());
        assert!(config.is_disabled(Strategy::Pngcrush));
        assert!(!config.is_disabled(Strategy::Oxipng));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.cpu_workers > 0);
        assert_eq!(config.io_workers, 2);
        assert!(config.strip_metadata);
        assert_eq!(config.png_level, 4);
        assert!(!config.dry_run);
        assert!(config.temp_dir.is_none());
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let original_config = Config {
            cpu_workers: 3,
            io_workers: 1,
            strip_metadata: false,
            png_level: 2,
            dry_run: true,
            disabled_strategies: vec!["optipng".to_string()],
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.cpu_workers, 3);
        assert_eq!(loaded_config.io_workers, 1);
        assert!(!loaded_config.strip_metadata);
        assert_eq!(loaded_config.png_level, 2);
        assert!(loaded_config.dry_run);
        assert_eq!(loaded_config.disabled_strategies, vec!["optipng".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_config_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config.io_workers, 2);
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "png_level": 1 }"#).await.unwrap();

        let config = Config::from_file(&path).await.unwrap();
        assert_eq!(config.png_level, 1);
        assert_eq!(config.io_workers, 2);
        assert!(config.strip_metadata);
    }
}
