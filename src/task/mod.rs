//! # File Task Module
//!
//! Il `FileTask` è l'unità di coordinamento per un singolo file: lancia i
//! worker, raccoglie i loro report e tiene il miglior risultato.
//!
//! ## Responsabilità:
//! - Validazione del file alla creazione (esistenza, leggibilità, dimensione)
//! - Accodamento dei worker sulla coda CPU o I/O in base all'affinità
//! - Merge dei report in un'unica sezione critica (un `Mutex` per file)
//! - Calcolo di progresso e stato (`Waiting -> Running -> terminale`)
//! - Cancellazione cooperativa e pulizia dei file temporanei
//!
//! ## Regola del merge:
//! Vince il risultato migliore, non l'ultimo arrivato: un candidato sostituisce
//! il precedente solo se strettamente più piccolo. I candidati scartati vengono
//! cancellati dopo aver rilasciato il lock.
//!
//! ## Esempio:
//! ```rust,ignore
//! let task = FileTask::create(&path, &config).await?;
//! task.enqueue_workers(&cpu_queue, &io_queue).await?;
//! task.wait_until_done().await;
//! if task.is_optimized().await {
//!     task.save_in_place().await?;
//! }
//! task.cleanup().await;
//! ```

mod snapshot;
mod state;
mod status;

pub use snapshot::FileSnapshot;
pub use state::WorkerInfo;
pub use status::Status;

use crate::config::Config;
use crate::error::OptimizeError;
use crate::file_manager::{FileKind, FileManager, SizeClass};
use crate::queue::{Affinity, WorkerQueue};
use crate::worker::{remove_candidate, Strategy, Worker, WorkerContext, WorkerInput, WorkerReport};
use state::{display_label_for, TaskState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

/// State shared between a FileTask and the workers it spawned
pub(crate) struct TaskShared {
    state: Mutex<TaskState>,
    /// Mirror of the cancelled flag, readable without the lock
    cancelled: AtomicBool,
    stop_sender: broadcast::Sender<()>,
    done_notify: Notify,
}

impl TaskShared {
    fn new(state: TaskState) -> Self {
        let (stop_sender, _) = broadcast::channel(1);
        Self {
            state: Mutex::new(state),
            cancelled: AtomicBool::new(false),
            stop_sender,
            done_notify: Notify::new(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) async fn worker_started(&self, id: usize) -> bool {
        self.state.lock().await.mark_started(id)
    }

    pub(crate) async fn record_progress(&self, id: usize, fraction: f64) {
        self.state.lock().await.record_progress(id, fraction);
    }

    pub(crate) async fn report(&self, id: usize, report: WorkerReport) {
        let outcome = self.state.lock().await.apply_report(id, report);

        for path in &outcome.discard {
            remove_candidate(path).await;
        }
        if outcome.became_done {
            self.done_notify.notify_waiters();
        }
    }

    /// Flag the task as cancelled and wake every worker waiting on the stop channel
    fn signal_stop(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            // No receivers is fine: nobody is running
            let _ = self.stop_sender.send(());
        }
    }
}

impl Drop for TaskShared {
    fn drop(&mut self) {
        if let Some(path) = self.state.get_mut().take_unconfirmed_output() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {} on drop: {}", path.display(), e);
                }
            }
        }
    }
}

/// Coordinates every optimization attempt for one file
pub struct FileTask {
    shared: Arc<TaskShared>,
    config: Config,
    kind: FileKind,
    original_size: u64,
}

impl FileTask {
    /// Validate `path` and capture its size.
    ///
    /// Fails with `NotFound` if the path is not an existing regular file,
    /// `NotReadable` if it cannot be opened and `SizeUnavailable` if its
    /// byte size cannot be queried.
    pub async fn create(path: impl AsRef<Path>, config: &Config) -> Result<Self, OptimizeError> {
        let path = path.as_ref();

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OptimizeError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(OptimizeError::NotReadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if !metadata.is_file() {
            return Err(OptimizeError::NotFound(path.to_path_buf()));
        }

        if let Err(source) = tokio::fs::File::open(path).await {
            return Err(OptimizeError::NotReadable {
                path: path.to_path_buf(),
                source,
            });
        }

        let original_size = FileManager::get_file_size(path)
            .await
            .ok_or_else(|| OptimizeError::SizeUnavailable(path.to_path_buf()))?;
        let kind = FileManager::detect_kind(path).await;

        debug!("Created task for {} ({:?}, {} bytes)", path.display(), kind, original_size);

        Ok(Self {
            shared: Arc::new(TaskShared::new(TaskState::new(path.to_path_buf(), original_size))),
            config: config.clone(),
            kind,
            original_size,
        })
    }

    /// Independent copy of the current observable state
    pub async fn snapshot(&self) -> FileSnapshot {
        let state = self.shared.state.lock().await;
        FileSnapshot::capture(&state, self.kind)
    }

    /// Update identity after the file was renamed on disk
    pub async fn set_source_path(&self, new_path: impl Into<PathBuf>) -> Result<(), OptimizeError> {
        let mut state = self.shared.state.lock().await;
        if state.active > 0 {
            return Err(OptimizeError::Busy(state.active));
        }
        let new_path = new_path.into();
        debug!("Task renamed: {} -> {}", state.source_path.display(), new_path.display());
        state.display_label = display_label_for(&new_path);
        state.source_path = new_path;
        Ok(())
    }

    /// Submit one worker per applicable strategy. Returns how many were enqueued.
    ///
    /// Every worker is registered and the batch sealed before the first job is
    /// submitted, so readers never see a partial count. A second call fails
    /// with `AlreadyEnqueued`; build a fresh task to retry.
    pub async fn enqueue_workers(
        &self,
        cpu_queue: &dyn WorkerQueue,
        io_queue: &dyn WorkerQueue,
    ) -> Result<usize, OptimizeError> {
        let keep_metadata = !self.config.strip_metadata || self.is_camera_photo().await;
        let plan = Strategy::plan(self.kind, self.original_size, &self.config);

        let (workers, became_done) = {
            let mut state = self.shared.state.lock().await;
            if state.enqueued {
                return Err(OptimizeError::AlreadyEnqueued(state.source_path.clone()));
            }
            state.enqueued = true;

            let input = Arc::new(WorkerInput {
                source: state.source_path.clone(),
                kind: self.kind,
                original_size: self.original_size,
                keep_metadata,
                png_level: self.config.png_level,
                temp_dir: self.config.temp_dir.clone(),
            });

            let workers: Vec<Worker> = plan
                .iter()
                .map(|strategy| Worker::new(state.register(*strategy), *strategy, Arc::clone(&input)))
                .collect();
            (workers, state.seal())
        };

        if became_done {
            debug!("No strategy applies to {:?} file, nothing to do", self.kind);
            self.shared.done_notify.notify_waiters();
        }

        let count = workers.len();
        for worker in workers {
            let affinity = worker.strategy().affinity();
            let ctx = WorkerContext::new(worker.id(), Arc::clone(&self.shared), self.shared.stop_sender.subscribe());
            let queue = match affinity {
                Affinity::Cpu => cpu_queue,
                Affinity::Io => io_queue,
            };
            queue.submit(Box::pin(worker.run(ctx)), affinity);
        }

        debug!("Enqueued {} workers", count);
        Ok(count)
    }

    /// Mark worker `id` as running. Hosts that run strategies themselves call
    /// this, then `report_progress`, then `report`.
    pub async fn worker_started(&self, id: usize) -> bool {
        self.shared.worker_started(id).await
    }

    pub async fn report_progress(&self, id: usize, fraction: f64) {
        self.shared.record_progress(id, fraction).await;
    }

    /// Deliver the final report of worker `id`
    pub async fn report(&self, id: usize, report: WorkerReport) {
        self.shared.report(id, report).await;
    }

    /// Cooperative cancel: running tools are killed, pending jobs report nothing
    pub async fn cancel(&self) {
        {
            let mut state = self.shared.state.lock().await;
            state.cancelled = true;
        }
        self.shared.signal_stop();
    }

    /// Cancel and delete every temporary output except a confirmed result.
    /// Safe to call repeatedly and in any state.
    pub async fn cleanup(&self) {
        let paths = {
            let mut state = self.shared.state.lock().await;
            state.take_cleanup_outputs()
        };
        self.shared.signal_stop();

        for path in &paths {
            remove_candidate(path).await;
        }
        if !paths.is_empty() {
            debug!("Cleaned up {} temporary outputs", paths.len());
        }
    }

    /// Keep the best output; cleanup and drop will leave it alone
    pub async fn confirm_result(&self) -> Option<PathBuf> {
        self.shared.state.lock().await.confirm()
    }

    /// Replace the source file with the best result.
    ///
    /// Returns the bytes saved, `None` when there is nothing to save. In dry
    /// run mode the source is left untouched.
    pub async fn save_in_place(&self) -> Result<Option<u64>, OptimizeError> {
        // The copy runs outside the lock; `saved` is claimed first so a
        // concurrent caller sees nothing left to save.
        let (source, output, saved) = {
            let mut state = self.shared.state.lock().await;
            if !state.is_done() {
                return Err(OptimizeError::NotDone(state.source_path.clone()));
            }
            if state.saved {
                return Ok(None);
            }

            let (size, output) = match &state.best {
                Some(best) => match &best.output {
                    Some(output) => (best.size, output.clone()),
                    None => return Ok(None),
                },
                None => return Ok(None),
            };
            let saved = self.original_size.saturating_sub(size);

            if self.config.dry_run {
                info!(
                    "[DRY RUN] Would replace {} ({} saved)",
                    state.source_path.display(),
                    FileManager::format_size(saved)
                );
                return Ok(Some(saved));
            }

            state.saved = true;
            (state.source_path.clone(), output, saved)
        };

        if let Err(e) = FileManager::replace_file(&source, &output).await {
            self.shared.state.lock().await.saved = false;
            return Err(e.into());
        }
        info!("Replaced {} ({} saved)", source.display(), FileManager::format_size(saved));

        // cleanup may have taken the output meanwhile; confirmed outputs stay
        let leftover = self.shared.state.lock().await.take_unconfirmed_output();
        if let Some(output) = leftover {
            remove_candidate(&output).await;
        }
        Ok(Some(saved))
    }

    /// Resolves once the task reaches a terminal state.
    ///
    /// Never resolves for a task whose workers were not enqueued.
    pub async fn wait_until_done(&self) {
        loop {
            let notified = self.shared.done_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done().await {
                return;
            }
            notified.await;
        }
    }

    // Queries

    /// True while waiting or running
    pub async fn is_busy(&self) -> bool {
        !self.is_done().await
    }

    /// True as soon as a strictly smaller result exists
    pub async fn is_optimized(&self) -> bool {
        self.shared.state.lock().await.is_optimized()
    }

    pub async fn is_done(&self) -> bool {
        self.shared.state.lock().await.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn is_large(&self) -> bool {
        SizeClass::classify(self.original_size) == SizeClass::Large
    }

    pub fn is_small(&self) -> bool {
        SizeClass::classify(self.original_size) == SizeClass::Small
    }

    /// JPEG with a camera-style name; its metadata is always kept
    pub async fn is_camera_photo(&self) -> bool {
        let path = self.source_path().await;
        self.kind == FileKind::Jpeg && FileManager::looks_like_camera_name(&path)
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub async fn percent_done(&self) -> f64 {
        self.shared.state.lock().await.progress
    }

    pub async fn status(&self) -> Status {
        self.shared.state.lock().await.status.clone()
    }

    pub async fn status_text(&self) -> String {
        self.shared.state.lock().await.status.text()
    }

    pub async fn status_order(&self) -> i64 {
        self.shared.state.lock().await.status.order()
    }

    /// Original size captured at creation
    pub fn byte_size(&self) -> u64 {
        self.original_size
    }

    pub async fn byte_size_optimized(&self) -> Option<u64> {
        self.shared.state.lock().await.best_size()
    }

    pub async fn best_tool(&self) -> Option<String> {
        let state = self.shared.state.lock().await;
        state.best.as_ref().map(|best| best.tool.clone())
    }

    /// Temp file holding the current best candidate
    pub async fn best_output(&self) -> Option<PathBuf> {
        let state = self.shared.state.lock().await;
        state.best_output().map(Path::to_path_buf)
    }

    pub async fn display_label(&self) -> String {
        self.shared.state.lock().await.display_label.clone()
    }

    pub async fn source_path(&self) -> PathBuf {
        self.shared.state.lock().await.source_path.clone()
    }

    pub async fn last_failure(&self) -> Option<String> {
        self.shared.state.lock().await.last_failure.clone()
    }

    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.shared.state.lock().await.workers.clone()
    }

    /// `(active, finished, total)`
    pub async fn worker_counts(&self) -> (usize, usize, usize) {
        let state = self.shared.state.lock().await;
        (state.active, state.finished, state.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ManualQueue;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    async fn write_file(dir: &TempDir, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, vec![0u8; size]).await.unwrap();
        path
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            temp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_validates_path() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let missing = FileTask::create(dir.path().join("nope.jpg"), &config).await;
        assert!(matches!(missing, Err(OptimizeError::NotFound(_))));

        let directory = FileTask::create(dir.path(), &config).await;
        assert!(matches!(directory, Err(OptimizeError::NotFound(_))));

        let path = write_file(&dir, "IMG_1234.JPG", 3000).await;
        let task = assert_ok!(FileTask::create(&path, &config).await);
        assert_eq!(task.byte_size(), 3000);
        assert_eq!(task.display_label().await, "IMG_1234.JPG");
        assert!(!task.is_small());
        assert!(!task.is_large());
        // zero bytes carry no magic, the extension decides
        assert_eq!(task.kind(), FileKind::Jpeg);
        assert!(task.is_camera_photo().await);
        assert_eq!(task.status().await, Status::Waiting);
        assert!(task.is_busy().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_unreadable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "locked.png", 100).await;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // root can open anything, nothing to assert there
        if std::fs::File::open(&path).is_err() {
            let result = FileTask::create(&path, &test_config(&dir)).await;
            assert!(matches!(result, Err(OptimizeError::NotReadable { .. })));
        }
    }

    #[tokio::test]
    async fn test_enqueue_splits_by_affinity() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "photo.jpg", 1000).await;
        let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();

        let cpu = ManualQueue::new();
        let io = ManualQueue::new();
        assert_eq!(task.enqueue_workers(&cpu, &io).await.unwrap(), 3);
        assert_eq!(cpu.len(), 2);
        assert_eq!(io.len(), 1);
        assert_eq!(io.pending_affinities(), vec![Affinity::Io]);
        assert_eq!(task.worker_counts().await, (3, 0, 3));

        let again = task.enqueue_workers(&cpu, &io).await;
        assert!(matches!(assert_err!(again), OptimizeError::AlreadyEnqueued(_)));
        assert_eq!(cpu.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_done_without_workers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "notes.txt", 10).await;
        let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();

        let queue = ManualQueue::new();
        assert_eq!(task.enqueue_workers(&queue, &queue).await.unwrap(), 0);
        assert!(queue.is_empty());
        assert!(task.is_done().await);
        assert_eq!(task.status().await, Status::NoSavings);
        assert_eq!(task.percent_done().await, 1.0);
        assert_eq!(task.worker_counts().await, (0, 0, 0));
        task.wait_until_done().await;
    }

    #[tokio::test]
    async fn test_set_source_path_refused_while_active() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.gif", 500).await;
        let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();

        let queue = ManualQueue::new();
        task.enqueue_workers(&queue, &queue).await.unwrap();
        let result = task.set_source_path(dir.path().join("b.gif")).await;
        assert!(matches!(result, Err(OptimizeError::Busy(2))));

        task.report(0, WorkerReport::NoImprovement).await;
        task.report(1, WorkerReport::NoImprovement).await;
        assert_ok!(task.set_source_path(dir.path().join("b.gif")).await);
        assert_eq!(task.display_label().await, "b.gif");
    }

    #[tokio::test]
    async fn test_save_in_place_replaces_source() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.webp", 100).await;
        let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();
        let queue = ManualQueue::new();
        task.enqueue_workers(&queue, &queue).await.unwrap();

        let candidate = dir.path().join(".optim-cwebp-1.webp");
        tokio::fs::write(&candidate, vec![1u8; 60]).await.unwrap();

        task.report(
            1,
            WorkerReport::Improved {
                size: 60,
                output: candidate.clone(),
                tool: "cwebp".into(),
            },
        )
        .await;
        assert!(matches!(task.save_in_place().await, Err(OptimizeError::NotDone(_))));

        task.report(0, WorkerReport::NoImprovement).await;
        assert_eq!(task.save_in_place().await.unwrap(), Some(40));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1u8; 60]);
        assert!(!candidate.exists());
        assert_eq!(task.save_in_place().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_replace_once() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.webp", 4096).await;
        let task = Arc::new(FileTask::create(&path, &test_config(&dir)).await.unwrap());
        let queue = ManualQueue::new();
        task.enqueue_workers(&queue, &queue).await.unwrap();

        let candidate = dir.path().join(".optim-cwebp-1.webp");
        tokio::fs::write(&candidate, vec![1u8; 1000]).await.unwrap();
        task.report(
            1,
            WorkerReport::Improved {
                size: 1000,
                output: candidate.clone(),
                tool: "cwebp".into(),
            },
        )
        .await;
        task.report(0, WorkerReport::NoImprovement).await;

        let saves: Vec<_> = (0..4)
            .map(|_| {
                let task = Arc::clone(&task);
                tokio::spawn(async move { task.save_in_place().await })
            })
            .collect();
        let mut replaced = 0;
        for save in saves {
            if assert_ok!(save.await.unwrap()).is_some() {
                replaced += 1;
            }
        }

        assert_eq!(replaced, 1);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1u8; 1000]);
        assert!(!candidate.exists());
        assert!(task.best_output().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_save_can_be_retried() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.webp", 100).await;
        let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();
        let queue = ManualQueue::new();
        task.enqueue_workers(&queue, &queue).await.unwrap();

        let candidate = dir.path().join(".optim-cwebp-1.webp");
        tokio::fs::write(&candidate, vec![1u8; 60]).await.unwrap();
        task.report(
            1,
            WorkerReport::Improved {
                size: 60,
                output: candidate.clone(),
                tool: "cwebp".into(),
            },
        )
        .await;
        task.report(0, WorkerReport::NoImprovement).await;

        tokio::fs::remove_file(&candidate).await.unwrap();
        assert!(matches!(task.save_in_place().await, Err(OptimizeError::Io(_))));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![0u8; 100]);

        tokio::fs::write(&candidate, vec![1u8; 60]).await.unwrap();
        assert_eq!(task.save_in_place().await.unwrap(), Some(40));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1u8; 60]);
    }

    #[tokio::test]
    async fn test_dry_run_keeps_source() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.gif", 100).await;
        let config = Config {
            dry_run: true,
            ..test_config(&dir)
        };
        let task = FileTask::create(&path, &config).await.unwrap();
        let queue = ManualQueue::new();
        task.enqueue_workers(&queue, &queue).await.unwrap();

        let candidate = dir.path().join(".optim-gifsicle-1.gif");
        tokio::fs::write(&candidate, vec![1u8; 10]).await.unwrap();
        task.report(
            1,
            WorkerReport::Improved {
                size: 10,
                output: candidate.clone(),
                tool: "gifsicle".into(),
            },
        )
        .await;
        task.report(0, WorkerReport::NoImprovement).await;

        assert_eq!(task.save_in_place().await.unwrap(), Some(90));
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 100);

        task.cleanup().await;
        assert!(!candidate.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_unconfirmed_output() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.gif", 100).await;
        let kept = dir.path().join(".optim-kept.gif");
        let dropped = dir.path().join(".optim-dropped.gif");

        for (candidate, confirm) in [(&kept, true), (&dropped, false)] {
            tokio::fs::write(candidate, vec![1u8; 10]).await.unwrap();
            let task = FileTask::create(&path, &test_config(&dir)).await.unwrap();
            let queue = ManualQueue::new();
            task.enqueue_workers(&queue, &queue).await.unwrap();
            drop(queue.take_all());

            task.report(
                1,
                WorkerReport::Improved {
                    size: 10,
                    output: candidate.clone(),
                    tool: "gifsicle".into(),
                },
            )
            .await;
            if confirm {
                assert_eq!(task.confirm_result().await, Some(candidate.clone()));
            }
        }

        assert!(kept.exists());
        assert!(!dropped.exists());
    }
}
