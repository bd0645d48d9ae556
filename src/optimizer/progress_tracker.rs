//! # Progress Tracking Module
//!
//! Unifica statistiche, progress bar ed eventi JSON in un singolo tracker
//! thread-safe, condiviso da tutti i file di un batch.

use crate::{
    file_manager::FileManager,
    json_output::JsonMessage,
    progress::{OptimizationStats, ProgressManager},
    task::FileSnapshot,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tracker progress unificato
#[derive(Clone)]
pub struct ProgressTracker {
    pub total_files: usize,
    json_output: bool,
    stats: Arc<Mutex<OptimizationStats>>,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    /// Crea un nuovo tracker; in modalità JSON la progress bar non viene disegnata
    pub fn new(total_files: usize, json_output: bool) -> Self {
        let progress_manager = if json_output {
            ProgressManager::hidden(total_files as u64)
        } else {
            ProgressManager::new(total_files as u64)
        };

        Self {
            total_files,
            json_output,
            stats: Arc::new(Mutex::new(OptimizationStats::new())),
            progress_manager,
        }
    }

    /// Registra un file terminato
    pub async fn file_finished(&self, snapshot: &FileSnapshot) {
        let stats = {
            let mut stats = self.stats.lock().await;
            stats.add_snapshot(snapshot);
            stats.clone()
        };

        let message = match (&snapshot.best_tool, snapshot.status.as_str()) {
            (Some(tool), _) => format!(
                "[OK] {}: {:.1}% saved with {}",
                snapshot.label,
                snapshot.reduction_percent(),
                tool
            ),
            (None, "err") => format!("[ERROR] {}: {}", snapshot.label, snapshot.status_text),
            (None, _) => format!("[SKIP] {}: no savings", snapshot.label),
        };
        self.progress_manager.update(&message);

        if self.json_output {
            JsonMessage::file_complete(snapshot).emit();
            JsonMessage::progress(&stats, self.total_files).emit();
        }
    }

    /// Registra un file che non è stato possibile aprire
    pub async fn file_error(&self, path: &Path, error: &str) {
        let stats = {
            let mut stats = self.stats.lock().await;
            stats.add_error();
            stats.clone()
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.progress_manager.update(&format!("[ERROR] {}: {}", name, error));

        if self.json_output {
            let size = FileManager::get_file_size(path).await.unwrap_or(0);
            JsonMessage::file_error(path.to_path_buf(), size, error.to_string()).emit();
            JsonMessage::progress(&stats, self.total_files).emit();
        }
    }

    /// Finalizza progress bar
    pub fn finish(&self, summary: &str) {
        self.progress_manager.finish(summary);
    }

    /// Ottieni statistiche per report finale
    pub async fn get_stats(&self) -> OptimizationStats {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::FileKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_tracker_accumulates() {
        let tracker = ProgressTracker::new(2, true);
        let snapshot = FileSnapshot {
            path: PathBuf::from("/img/a.gif"),
            label: "a.gif".into(),
            kind: FileKind::Gif,
            original_size: 400,
            optimized_size: Some(300),
            best_tool: Some("gifsicle".into()),
            percent_done: 1.0,
            status: "ok".into(),
            status_order: 4,
            status_text: "Optimized successfully with gifsicle".into(),
            total_workers: 2,
            active_workers: 0,
            finished_workers: 2,
            done: true,
            optimized: true,
            last_failure: None,
        };

        tracker.file_finished(&snapshot).await;
        tracker.file_error(Path::new("/img/missing.png"), "File not found").await;

        let stats = tracker.get_stats().await;
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_optimized, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_bytes_saved, 100);
    }
}
