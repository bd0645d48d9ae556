//! Mutable state of one FileTask.
//!
//! Everything in here is plain synchronous data manipulated under the
//! FileTask's single mutex. Methods never touch the filesystem: whenever a
//! candidate output must be deleted its path is handed back to the caller,
//! which removes it after releasing the lock.

use super::status::Status;
use crate::queue::Affinity;
use crate::worker::{Strategy, WorkerReport};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// In-flight workers never contribute a full share, so the mean only reaches 1.0 when done
const MAX_IN_FLIGHT_PROGRESS: f64 = 0.99;

/// Public view of one worker handle
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: usize,
    pub strategy: Strategy,
    pub affinity: Affinity,
    pub progress: f64,
    pub started: bool,
    pub finished: bool,
    #[serde(skip)]
    reported_output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct BestResult {
    pub size: u64,
    pub tool: String,
    /// `None` once the file was cleaned up or saved in place
    pub output: Option<PathBuf>,
}

/// Result of applying one report
#[derive(Debug, Default)]
pub(crate) struct ReportOutcome {
    /// Candidate files to delete once the lock is released
    pub discard: Vec<PathBuf>,
    /// The report moved the task into a terminal state
    pub became_done: bool,
}

#[derive(Debug)]
pub(crate) struct TaskState {
    pub source_path: PathBuf,
    pub display_label: String,
    pub original_size: u64,
    pub best: Option<BestResult>,
    pub workers: Vec<WorkerInfo>,
    pub active: usize,
    pub finished: usize,
    pub enqueued: bool,
    pub sealed: bool,
    pub progress: f64,
    pub status: Status,
    pub cancelled: bool,
    pub cleaned_up: bool,
    pub confirmed: bool,
    pub saved: bool,
    pub fatal: Option<String>,
    pub last_failure: Option<String>,
}

pub(crate) fn display_label_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

impl TaskState {
    pub fn new(source_path: PathBuf, original_size: u64) -> Self {
        Self {
            display_label: display_label_for(&source_path),
            source_path,
            original_size,
            best: None,
            workers: Vec::new(),
            active: 0,
            finished: 0,
            enqueued: false,
            sealed: false,
            progress: 0.0,
            status: Status::Waiting,
            cancelled: false,
            cleaned_up: false,
            confirmed: false,
            saved: false,
            fatal: None,
            last_failure: None,
        }
    }

    pub fn total(&self) -> usize {
        self.workers.len()
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_optimized(&self) -> bool {
        self.best.is_some()
    }

    pub fn best_size(&self) -> Option<u64> {
        self.best.as_ref().map(|best| best.size)
    }

    pub fn best_output(&self) -> Option<&Path> {
        self.best.as_ref().and_then(|best| best.output.as_deref())
    }

    /// Add a worker handle; counters move together with the registration
    pub fn register(&mut self, strategy: Strategy) -> usize {
        let id = self.workers.len();
        self.workers.push(WorkerInfo {
            id,
            strategy,
            affinity: strategy.affinity(),
            progress: 0.0,
            started: false,
            finished: false,
            reported_output: None,
        });
        self.active += 1;
        id
    }

    /// No more workers will be added. Returns true if that alone finished the task.
    pub fn seal(&mut self) -> bool {
        self.sealed = true;
        self.refresh()
    }

    /// A worker began executing. False tells it not to run.
    pub fn mark_started(&mut self, id: usize) -> bool {
        if self.cancelled {
            return false;
        }
        match self.workers.get_mut(id) {
            Some(worker) if !worker.finished => {
                worker.started = true;
                self.refresh();
                true
            }
            _ => false,
        }
    }

    pub fn record_progress(&mut self, id: usize, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        if let Some(worker) = self.workers.get_mut(id) {
            if !worker.finished {
                worker.started = true;
                worker.progress = worker.progress.max(fraction.clamp(0.0, 1.0));
                self.refresh();
            }
        }
    }

    /// Merge one worker's final report
    pub fn apply_report(&mut self, id: usize, report: WorkerReport) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();

        let already_finished = match self.workers.get(id) {
            Some(worker) => worker.finished,
            None => {
                warn!("Report from unknown worker {} for {}", id, self.display_label);
                if let WorkerReport::Improved { output, .. } = report {
                    self.discard_unless_best(output, &mut outcome.discard);
                }
                return outcome;
            }
        };

        if already_finished {
            // Re-delivery: the first copy was already kept or deleted
            if let WorkerReport::Improved { output, .. } = report {
                let same = self.workers[id].reported_output.as_deref() == Some(output.as_path());
                if !same {
                    self.discard_unless_best(output, &mut outcome.discard);
                }
            }
            debug!("Ignoring duplicate report from worker {} for {}", id, self.display_label);
            return outcome;
        }

        let worker = &mut self.workers[id];
        worker.finished = true;
        worker.progress = 1.0;
        self.finished += 1;
        self.active = self.active.saturating_sub(1);

        let late = self.cancelled || self.cleaned_up;
        match report {
            WorkerReport::Improved { size, output, tool } => {
                self.workers[id].reported_output = Some(output.clone());
                if late {
                    debug!("Discarding {} result for {} after cancellation", tool, self.display_label);
                    self.discard_unless_best(output, &mut outcome.discard);
                } else {
                    self.merge(size, output, tool, &mut outcome.discard);
                }
            }
            WorkerReport::NoImprovement => {}
            WorkerReport::Failed { reason, fatal } => {
                debug!("Worker {} failed for {}: {}", id, self.display_label, reason);
                if fatal && self.fatal.is_none() {
                    self.fatal = Some(reason.clone());
                }
                self.last_failure = Some(reason);
            }
        }

        outcome.became_done = self.refresh();
        outcome
    }

    /// Best-result-wins: only a strictly smaller candidate replaces the current best
    fn merge(&mut self, size: u64, output: PathBuf, tool: String, discard: &mut Vec<PathBuf>) {
        if self.best_output() == Some(output.as_path()) {
            return;
        }

        let threshold = self.best_size().unwrap_or(self.original_size);
        if size < threshold {
            if let Some(previous) = self.best.take().and_then(|best| best.output) {
                if previous != output {
                    discard.push(previous);
                }
            }
            debug!("New best for {}: {} bytes by {}", self.display_label, size, tool);
            self.best = Some(BestResult {
                size,
                tool,
                output: Some(output),
            });
        } else {
            discard.push(output);
        }
    }

    fn discard_unless_best(&self, output: PathBuf, discard: &mut Vec<PathBuf>) {
        if self.best_output() != Some(output.as_path()) {
            discard.push(output);
        }
    }

    /// Mark cancelled and hand back every temp output that is not a confirmed result
    pub fn take_cleanup_outputs(&mut self) -> Vec<PathBuf> {
        self.cancelled = true;
        self.cleaned_up = true;
        self.take_unconfirmed_output().into_iter().collect()
    }

    pub fn take_unconfirmed_output(&mut self) -> Option<PathBuf> {
        if self.confirmed {
            return None;
        }
        self.best.as_mut().and_then(|best| best.output.take())
    }

    /// Keep the best output past cleanup; the caller now owns the file
    pub fn confirm(&mut self) -> Option<PathBuf> {
        let output = self.best_output()?.to_path_buf();
        self.confirmed = true;
        Some(output)
    }

    /// Recompute progress and status. Returns true if the task just became done.
    fn refresh(&mut self) -> bool {
        let was_done = self.is_done();
        let total = self.total();

        let computed = if total == 0 {
            0.0
        } else {
            self.workers
                .iter()
                .map(|w| if w.finished { 1.0 } else { w.progress.min(MAX_IN_FLIGHT_PROGRESS) })
                .sum::<f64>()
                / total as f64
        };
        self.progress = self.progress.max(computed);

        if self.sealed && self.finished == total {
            let next = match (&self.best, &self.fatal) {
                (Some(best), _) => Status::Optimized {
                    tool: best.tool.clone(),
                },
                (None, Some(reason)) => Status::Failed {
                    reason: reason.clone(),
                },
                (None, None) => Status::NoSavings,
            };
            self.advance(next);
        } else if self.workers.iter().any(|w| w.started || w.finished) {
            self.advance(Status::Running);
        }

        if self.is_done() {
            self.progress = 1.0;
        }

        !was_done && self.is_done()
    }

    fn advance(&mut self, next: Status) {
        if self.status.can_advance_to(&next) {
            self.status = next;
        }
    }
}
