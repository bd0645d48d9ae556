use super::state::TaskState;
use crate::file_manager::{FileKind, FileManager};
use serde::Serialize;
use std::path::PathBuf;

/// Immutable copy of a FileTask's observable state.
///
/// Holds no reference back to the task, so it can be kept, sorted and
/// serialized freely while the task keeps running.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub label: String,
    pub kind: FileKind,
    pub original_size: u64,
    pub optimized_size: Option<u64>,
    pub best_tool: Option<String>,
    pub percent_done: f64,
    pub status: String,
    pub status_order: i64,
    pub status_text: String,
    pub total_workers: usize,
    pub active_workers: usize,
    pub finished_workers: usize,
    pub done: bool,
    pub optimized: bool,
    pub last_failure: Option<String>,
}

impl FileSnapshot {
    pub(crate) fn capture(state: &TaskState, kind: FileKind) -> Self {
        Self {
            path: state.source_path.clone(),
            label: state.display_label.clone(),
            kind,
            original_size: state.original_size,
            optimized_size: state.best_size(),
            best_tool: state.best.as_ref().map(|best| best.tool.clone()),
            percent_done: state.progress,
            status: state.status.label().to_string(),
            status_order: state.status.order(),
            status_text: state.status.text(),
            total_workers: state.total(),
            active_workers: state.active,
            finished_workers: state.finished,
            done: state.is_done(),
            optimized: state.is_optimized(),
            last_failure: state.last_failure.clone(),
        }
    }

    /// Bytes saved by the best result (0 when not optimized)
    pub fn savings(&self) -> u64 {
        self.optimized_size
            .map(|size| self.original_size.saturating_sub(size))
            .unwrap_or(0)
    }

    pub fn reduction_percent(&self) -> f64 {
        match self.optimized_size {
            Some(size) => FileManager::calculate_reduction(self.original_size, size),
            None => 0.0,
        }
    }
}
