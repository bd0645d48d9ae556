//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per chi pilota il
//! binario da un altro processo (una GUI, uno script).
//!
//! ## Responsabilità:
//! - Emette un messaggio JSON per riga su stdout
//! - Costruisce gli eventi a partire da `FileSnapshot` e `OptimizationStats`
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio processo di ottimizzazione
//! - `progress`: Progresso corrente (file processati, stats)
//! - `file_complete`: Fine elaborazione di un file
//! - `complete`: Fine processo completo con statistiche finali
//! - `error`: Errore durante elaborazione

use crate::config::Config;
use crate::progress::OptimizationStats;
use crate::task::FileSnapshot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio del processo di ottimizzazione
    #[serde(rename = "start")]
    Start {
        inputs: Vec<PathBuf>,
        total_files: usize,
        config: JsonConfig,
    },

    /// Progresso corrente
    #[serde(rename = "progress")]
    Progress {
        current: usize,
        total: usize,
        percentage: f64,
        files_optimized: usize,
        files_skipped: usize,
        errors: usize,
        bytes_saved: u64,
    },

    /// Fine elaborazione di un file specifico
    #[serde(rename = "file_complete")]
    FileComplete {
        path: PathBuf,
        original_size: u64,
        optimized_size: u64,
        reduction_percent: f64,
        status: String,
        status_text: String,
        tool: Option<String>,
        error: Option<String>,
    },

    /// Processo completato
    #[serde(rename = "complete")]
    Complete {
        files_processed: usize,
        files_optimized: usize,
        files_skipped: usize,
        files_failed: usize,
        errors: usize,
        total_bytes_saved: u64,
        average_reduction: f64,
        duration_seconds: f64,
    },

    /// Errore generale
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub cpu_workers: usize,
    pub io_workers: usize,
    pub strip_metadata: bool,
    pub png_level: u8,
    pub dry_run: bool,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(inputs: Vec<PathBuf>, total_files: usize, config: JsonConfig) -> Self {
        Self::Start {
            inputs,
            total_files,
            config,
        }
    }

    /// Crea un messaggio di progresso
    pub fn progress(stats: &OptimizationStats, total: usize) -> Self {
        let current = stats.files_processed;
        let percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self::Progress {
            current,
            total,
            percentage,
            files_optimized: stats.files_optimized,
            files_skipped: stats.files_skipped,
            errors: stats.errors + stats.files_failed,
            bytes_saved: stats.total_bytes_saved,
        }
    }

    /// Crea un messaggio di completamento file
    pub fn file_complete(snapshot: &FileSnapshot) -> Self {
        Self::FileComplete {
            path: snapshot.path.clone(),
            original_size: snapshot.original_size,
            optimized_size: snapshot.optimized_size.unwrap_or(snapshot.original_size),
            reduction_percent: snapshot.reduction_percent(),
            status: snapshot.status.clone(),
            status_text: snapshot.status_text.clone(),
            tool: snapshot.best_tool.clone(),
            error: snapshot.last_failure.clone(),
        }
    }

    /// File che non è diventato un task
    pub fn file_error(path: PathBuf, size: u64, error: String) -> Self {
        Self::FileComplete {
            path,
            original_size: size,
            optimized_size: size,
            reduction_percent: 0.0,
            status: "err".to_string(),
            status_text: format!("Optimization failed: {}", error),
            tool: None,
            error: Some(error),
        }
    }

    pub fn complete(stats: &OptimizationStats, duration_seconds: f64) -> Self {
        Self::Complete {
            files_processed: stats.files_processed,
            files_optimized: stats.files_optimized,
            files_skipped: stats.files_skipped,
            files_failed: stats.files_failed,
            errors: stats.errors,
            total_bytes_saved: stats.total_bytes_saved,
            average_reduction: stats.overall_reduction_percent(),
            duration_seconds,
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            cpu_workers: config.cpu_workers,
            io_workers: config.io_workers,
            strip_metadata: config.strip_metadata,
            png_level: config.png_level,
            dry_run: config.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_tagged() {
        let json = serde_json::to_value(JsonMessage::error("boom".into(), None)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");

        let mut stats = OptimizationStats::new();
        stats.add_optimized(1000, 800);
        stats.add_error();
        let json = serde_json::to_value(JsonMessage::progress(&stats, 4)).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["current"], 2);
        assert_eq!(json["percentage"], 50.0);
        assert_eq!(json["bytes_saved"], 200);
    }

    #[test]
    fn test_file_error_reports_original_size() {
        let message = JsonMessage::file_error(PathBuf::from("/img/x.png"), 42, "File not found".into());
        let json = serde_json::to_value(message).unwrap();
        assert_eq!(json["type"], "file_complete");
        assert_eq!(json["optimized_size"], 42);
        assert_eq!(json["status"], "err");
    }

    #[test]
    fn test_config_summary() {
        let config = Config {
            cpu_workers: 3,
            dry_run: true,
            ..Default::default()
        };
        let summary = JsonConfig::from(&config);
        assert_eq!(summary.cpu_workers, 3);
        assert!(summary.dry_run);
    }
}
