//! # Worker Module
//!
//! Un worker è un singolo tentativo di ottimizzazione (una strategia) su un
//! singolo file.
//!
//! ## Responsabilità:
//! - Definisce l'insieme chiuso delle strategie (`Strategy`) e la loro affinità
//!   (coda CPU o coda I/O)
//! - Sceglie quali strategie applicare in base al tipo e alla dimensione del file
//! - Esegue la strategia e produce esattamente un `WorkerReport`
//! - Supporta la cancellazione cooperativa tramite broadcast channel
//!
//! ## Strategie:
//!
//! | Formato | Strategie (affinità) |
//! |---------|----------------------|
//! | JPEG    | strip-trailing (io), jpegtran (cpu), jpegoptim (cpu) |
//! | PNG     | strip-trailing (io), oxipng (cpu), optipng (cpu), pngcrush (cpu) |
//! | GIF     | strip-trailing (io), gifsicle (cpu) |
//! | WebP    | strip-trailing (io), cwebp lossless (cpu) |
//!
//! `optipng` e `pngcrush` sono lenti: vengono saltati per i file grandi.
//!
//! ## Protocollo:
//! 1. `started()` - se il task è già stato cancellato il worker termina subito
//! 2. `progress(fraction)` - opzionale, più volte
//! 3. un report finale: `Improved`, `NoImprovement` oppure `Failed`

mod tools;
mod trailing;

use crate::config::Config;
use crate::file_manager::{FileKind, SizeClass};
use crate::queue::Affinity;
use crate::task::TaskShared;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::Builder;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Closed set of optimization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Drop bytes after the container's end marker (native, I/O bound)
    StripTrailing,
    Jpegtran,
    Jpegoptim,
    Oxipng,
    Optipng,
    Pngcrush,
    Gifsicle,
    /// cwebp in lossless mode
    Cwebp,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::StripTrailing,
        Strategy::Jpegtran,
        Strategy::Jpegoptim,
        Strategy::Oxipng,
        Strategy::Optipng,
        Strategy::Pngcrush,
        Strategy::Gifsicle,
        Strategy::Cwebp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::StripTrailing => "strip-trailing",
            Self::Jpegtran => "jpegtran",
            Self::Jpegoptim => "jpegoptim",
            Self::Oxipng => "oxipng",
            Self::Optipng => "optipng",
            Self::Pngcrush => "pngcrush",
            Self::Gifsicle => "gifsicle",
            Self::Cwebp => "cwebp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(name))
    }

    /// Which queue this strategy runs on
    pub fn affinity(&self) -> Affinity {
        match self {
            Self::StripTrailing => Affinity::Io,
            _ => Affinity::Cpu,
        }
    }

    /// External executable, `None` for native strategies
    pub fn tool(&self) -> Option<&'static str> {
        match self {
            Self::StripTrailing => None,
            other => Some(other.name()),
        }
    }

    /// Brute-force tools that are not worth running on large files
    pub fn is_slow(&self) -> bool {
        matches!(self, Self::Optipng | Self::Pngcrush)
    }

    /// Strategies applicable to a file kind, cheapest first
    pub fn for_kind(kind: FileKind) -> &'static [Strategy] {
        match kind {
            FileKind::Jpeg => &[Self::StripTrailing, Self::Jpegtran, Self::Jpegoptim],
            FileKind::Png => &[Self::StripTrailing, Self::Oxipng, Self::Optipng, Self::Pngcrush],
            FileKind::Gif => &[Self::StripTrailing, Self::Gifsicle],
            FileKind::Webp => &[Self::StripTrailing, Self::Cwebp],
            FileKind::Unknown => &[],
        }
    }

    /// Final ordered plan for one file
    pub fn plan(kind: FileKind, original_size: u64, config: &Config) -> Vec<Strategy> {
        let large = SizeClass::classify(original_size) == SizeClass::Large;

        Self::for_kind(kind)
            .iter()
            .copied()
            .filter(|strategy| !config.is_disabled(*strategy))
            .filter(|strategy| !(large && strategy.is_slow()))
            .collect()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The one final report every worker delivers
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReport {
    /// A candidate output smaller than the original
    Improved {
        size: u64,
        output: PathBuf,
        tool: String,
    },
    NoImprovement,
    /// `fatal` marks a condition that dooms the whole file (unreadable input, disk full)
    Failed { reason: String, fatal: bool },
}

impl WorkerReport {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            fatal: true,
        }
    }
}

/// Per-file parameters shared by every worker of one FileTask
#[derive(Debug, Clone)]
pub struct WorkerInput {
    pub source: PathBuf,
    pub kind: FileKind,
    pub original_size: u64,
    pub keep_metadata: bool,
    pub png_level: u8,
    pub temp_dir: Option<PathBuf>,
}

impl WorkerInput {
    /// Directory candidate outputs are written to
    fn candidate_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .or_else(|| self.source.parent().map(Path::to_path_buf))
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Create an empty candidate file owned by the caller (not deleted on drop)
    pub(crate) fn create_candidate(&self, strategy: Strategy) -> std::io::Result<PathBuf> {
        let file = Builder::new()
            .prefix(&format!(".optim-{}-", strategy.name()))
            .suffix(&format!(".{}", self.kind.extension()))
            .tempfile_in(self.candidate_dir())?;

        file.into_temp_path()
            .keep()
            .map_err(|e| e.error)
    }

    /// Turn a finished candidate into a report, deleting it unless it improved
    pub(crate) async fn evaluate_candidate(&self, output: PathBuf, strategy: Strategy) -> WorkerReport {
        let size = match tokio::fs::metadata(&output).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                remove_candidate(&output).await;
                return WorkerReport::failed(format!("{} output unreadable: {}", strategy, e));
            }
        };

        if size == 0 {
            remove_candidate(&output).await;
            return WorkerReport::failed(format!("{} produced an empty file", strategy));
        }

        if size < self.original_size {
            debug!("{} shrank {} from {} to {} bytes", strategy, self.source.display(), self.original_size, size);
            WorkerReport::Improved {
                size,
                output,
                tool: strategy.name().to_string(),
            }
        } else {
            debug!("{} found no savings for {}", strategy, self.source.display());
            remove_candidate(&output).await;
            WorkerReport::NoImprovement
        }
    }
}

/// Best-effort removal of a candidate output
pub(crate) async fn remove_candidate(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove candidate {}: {}", path.display(), e);
        }
    }
}

/// Whether an I/O error means the disk is full (fatal for the whole file)
pub(crate) fn is_disk_full(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(28) // ENOSPC
    }
    #[cfg(windows)]
    {
        error.raw_os_error() == Some(112) // ERROR_DISK_FULL
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = error;
        false
    }
}

/// Handle a running worker uses to talk to its FileTask
pub struct WorkerContext {
    id: usize,
    task: Arc<TaskShared>,
    stop_receiver: broadcast::Receiver<()>,
}

impl WorkerContext {
    pub(crate) fn new(id: usize, task: Arc<TaskShared>, stop_receiver: broadcast::Receiver<()>) -> Self {
        Self {
            id,
            task,
            stop_receiver,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Checks if a stop signal has been received.
    pub fn should_stop(&mut self) -> bool {
        if self.task.is_cancelled() {
            return true;
        }
        match self.stop_receiver.try_recv() {
            Ok(_) => true,
            Err(broadcast::error::TryRecvError::Empty) => false,
            // Signal was sent but we missed it, treat as stop
            Err(broadcast::error::TryRecvError::Lagged(_)) => true,
            Err(broadcast::error::TryRecvError::Closed) => false,
        }
    }

    /// Resolves once the task is cancelled
    pub async fn stopped(&mut self) {
        if self.task.is_cancelled() {
            return;
        }
        match self.stop_receiver.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }

    /// Tell the task this worker is running. False if it should not run at all.
    pub async fn started(&self) -> bool {
        self.task.worker_started(self.id).await
    }

    pub async fn progress(&self, fraction: f64) {
        self.task.record_progress(self.id, fraction).await;
    }

    pub async fn finish(self, report: WorkerReport) {
        self.task.report(self.id, report).await;
    }
}

/// One strategy bound to one file
pub struct Worker {
    id: usize,
    strategy: Strategy,
    input: Arc<WorkerInput>,
}

impl Worker {
    pub fn new(id: usize, strategy: Strategy, input: Arc<WorkerInput>) -> Self {
        Self { id, strategy, input }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Full lifecycle: start, execute, report exactly once
    pub async fn run(self, mut ctx: WorkerContext) {
        if !ctx.started().await || ctx.should_stop() {
            debug!("Worker {} ({}) skipped: task cancelled", self.id, self.strategy);
            ctx.finish(WorkerReport::NoImprovement).await;
            return;
        }

        let report = self.execute(&mut ctx).await;
        ctx.finish(report).await;
    }

    /// Run the strategy and produce its report
    pub async fn execute(&self, ctx: &mut WorkerContext) -> WorkerReport {
        if let Err(e) = tokio::fs::metadata(&self.input.source).await {
            return WorkerReport::fatal(format!("Source unreadable: {}", e));
        }

        match self.strategy {
            Strategy::StripTrailing => trailing::run(&self.input, ctx).await,
            strategy => tools::run(strategy, &self.input, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(Strategy::from_name("OxiPNG"), Some(Strategy::Oxipng));
        assert_eq!(Strategy::from_name("zopfli"), None);
    }

    #[test]
    fn test_jpeg_plan_has_two_cpu_and_one_io() {
        let plan = Strategy::plan(FileKind::Jpeg, 1_000_000, &Config::default());
        assert_eq!(plan, vec![Strategy::StripTrailing, Strategy::Jpegtran, Strategy::Jpegoptim]);

        let cpu = plan.iter().filter(|s| s.affinity() == Affinity::Cpu).count();
        let io = plan.iter().filter(|s| s.affinity() == Affinity::Io).count();
        assert_eq!((cpu, io), (2, 1));
    }

    #[test]
    fn test_large_png_skips_slow_tools() {
        let config = Config::default();
        let small = Strategy::plan(FileKind::Png, 10_000, &config);
        assert!(small.contains(&Strategy::Pngcrush));

        let large = Strategy::plan(FileKind::Png, 50 * 1024 * 1024, &config);
        assert_eq!(large, vec![Strategy::StripTrailing, Strategy::Oxipng]);
    }

    #[test]
    fn test_disabled_strategies_are_dropped() {
        let config = Config {
            disabled_strategies: vec!["strip-trailing".to_string(), "jpegoptim".to_string()],
            ..Default::default()
        };
        assert_eq!(Strategy::plan(FileKind::Jpeg, 1000, &config), vec![Strategy::Jpegtran]);
    }

    #[test]
    fn test_unknown_kind_has_no_plan() {
        assert!(Strategy::plan(FileKind::Unknown, 1000, &Config::default()).is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_candidate() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = WorkerInput {
            source: dir.path().join("a.png"),
            kind: FileKind::Png,
            original_size: 10,
            keep_metadata: false,
            png_level: 4,
            temp_dir: Some(dir.path().to_path_buf()),
        };

        let smaller = input.create_candidate(Strategy::Oxipng).unwrap();
        std::fs::write(&smaller, b"12345").unwrap();
        let report = input.evaluate_candidate(smaller.clone(), Strategy::Oxipng).await;
        assert_eq!(
            report,
            WorkerReport::Improved {
                size: 5,
                output: smaller.clone(),
                tool: "oxipng".to_string()
            }
        );
        assert!(smaller.exists());

        let bigger = input.create_candidate(Strategy::Optipng).unwrap();
        std::fs::write(&bigger, b"0123456789abc").unwrap();
        let report = input.evaluate_candidate(bigger.clone(), Strategy::Optipng).await;
        assert_eq!(report, WorkerReport::NoImprovement);
        assert!(!bigger.exists());

        let empty = input.create_candidate(Strategy::Pngcrush).unwrap();
        let report = input.evaluate_candidate(empty.clone(), Strategy::Pngcrush).await;
        assert!(matches!(report, WorkerReport::Failed { fatal: false, .. }));
        assert!(!empty.exists());
    }
}
