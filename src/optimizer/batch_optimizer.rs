//! # Batch Optimizer
//!
//! Orchestratore che guida un `FileTask` per ogni immagine trovata.
//!
//! ## Flusso:
//! 1. Discovery dei file a partire dai path di input
//! 2. Controllo dei tool esterni disponibili (quelli mancanti vengono solo segnalati)
//! 3. Per ogni file: crea il task, accoda i worker sulle code condivise,
//!    attende la fine, sostituisce il file e pulisce i temporanei
//! 4. Statistiche finali (log oppure evento JSON `complete`)
//!
//! Le due code (CPU e I/O) sono condivise da tutti i file; un semaforo limita
//! quanti file sono in lavorazione contemporaneamente, così il numero di
//! candidati temporanei su disco resta contenuto.

use crate::{
    config::Config,
    file_manager::{FileManager, SizeClass},
    json_output::{JsonConfig, JsonMessage},
    optimizer::progress_tracker::ProgressTracker,
    progress::OptimizationStats,
    queue::{TaskQueue, WorkerQueue},
    task::{FileSnapshot, FileTask},
    tool_resolver::ToolPathResolver,
    worker::Strategy,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Orchestratore principale
pub struct BatchOptimizer {
    config: Config,
    cpu_queue: Arc<TaskQueue>,
    io_queue: Arc<TaskQueue>,
    file_limit: Arc<Semaphore>,
}

impl BatchOptimizer {
    /// Crea nuova istanza dell'ottimizzatore
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let cpu_queue = Arc::new(TaskQueue::new("cpu", config.cpu_workers));
        let io_queue = Arc::new(TaskQueue::new("io", config.io_workers));
        let file_limit = Arc::new(Semaphore::new((config.cpu_workers * 2).max(1)));

        Ok(Self {
            config,
            cpu_queue,
            io_queue,
            file_limit,
        })
    }

    /// Esegue il processo di ottimizzazione
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<OptimizationStats> {
        let start_time = Instant::now();

        let files = Self::discover(inputs)?;

        self.emit_start_message(inputs, &files);
        self.log_configuration(&files);
        self.check_dependencies();

        if files.is_empty() {
            let stats = OptimizationStats::new();
            if self.config.json_output {
                JsonMessage::complete(&stats, start_time.elapsed().as_secs_f64()).emit();
            } else {
                info!("No image files found to process");
            }
            return Ok(stats);
        }

        let tracker = ProgressTracker::new(files.len(), self.config.json_output);
        let stats = self.process_files_concurrently(files, tracker.clone()).await?;

        tracker.finish(&stats.format_summary());
        self.print_final_stats(&stats, start_time.elapsed().as_secs_f64());

        Ok(stats)
    }

    /// Trova le immagini sotto tutti i path di input, senza duplicati
    pub fn discover(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            let found = FileManager::find_image_files(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            files.extend(found);
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn emit_start_message(&self, inputs: &[PathBuf], files: &[PathBuf]) {
        if self.config.json_output {
            JsonMessage::start(inputs.to_vec(), files.len(), JsonConfig::from(&self.config)).emit();
        } else {
            info!("Starting image optimization of {} input path(s)", inputs.len());
        }
    }

    /// Logga configurazione (solo se non JSON mode)
    fn log_configuration(&self, files: &[PathBuf]) {
        if self.config.json_output {
            return;
        }

        info!(
            "Queues: {} CPU workers, {} I/O workers",
            self.config.cpu_workers, self.config.io_workers
        );
        if self.config.strip_metadata {
            info!("Metadata: stripped (camera photos keep theirs)");
        } else {
            info!("Metadata: kept");
        }
        if !self.config.disabled_strategies.is_empty() {
            info!("Disabled strategies: {}", self.config.disabled_strategies.join(", "));
        }
        if self.config.dry_run {
            info!("Dry run mode: No files will be modified");
        }

        info!("Found {} image files to process", files.len());
    }

    /// Tool esterni mancanti. Non è un errore: le strategie relative falliscono
    /// singolarmente e gli altri worker proseguono.
    pub fn check_dependencies(&self) -> Vec<&'static str> {
        let resolver = ToolPathResolver::instance();
        let missing: Vec<&'static str> = Strategy::ALL
            .iter()
            .filter(|strategy| !self.config.is_disabled(**strategy))
            .filter_map(|strategy| strategy.tool())
            .filter(|tool| !resolver.is_tool_available(tool))
            .collect();

        for tool in &missing {
            warn!("{} not found, its strategy will be skipped", tool);
        }
        missing
    }

    /// Processa i file in parallelo, limitando quanti sono in lavorazione
    async fn process_files_concurrently(
        &self,
        files: Vec<PathBuf>,
        tracker: ProgressTracker,
    ) -> Result<OptimizationStats> {
        let mut handles = Vec::with_capacity(files.len());

        for path in files {
            let permit = self.file_limit.clone().acquire_owned().await?;
            let config = self.config.clone();
            let cpu_queue = Arc::clone(&self.cpu_queue);
            let io_queue = Arc::clone(&self.io_queue);
            let tracker = tracker.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match Self::process_file(&config, &path, &*cpu_queue, &*io_queue).await {
                    Ok(snapshot) => tracker.file_finished(&snapshot).await,
                    Err(e) => {
                        warn!("Failed to optimize {}: {:#}", path.display(), e);
                        tracker.file_error(&path, &format!("{:#}", e)).await;
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("File task aborted: {}", e);
            }
        }

        Ok(tracker.get_stats().await)
    }

    /// Ciclo di vita completo di un singolo file
    pub async fn process_file(
        config: &Config,
        path: &Path,
        cpu_queue: &dyn WorkerQueue,
        io_queue: &dyn WorkerQueue,
    ) -> Result<FileSnapshot> {
        let task = FileTask::create(path, config).await?;
        let count = task.enqueue_workers(cpu_queue, io_queue).await?;
        debug!("{}: {} workers", path.display(), count);

        let limit = Self::time_limit(task.byte_size());
        if tokio::time::timeout(limit, task.wait_until_done()).await.is_err() {
            error!("File processing timed out after {:?}: {}", limit, path.display());
            task.cleanup().await;
            return Err(anyhow::anyhow!("Processing timeout after {:?}", limit));
        }

        let saved = task.save_in_place().await;
        let snapshot = task.snapshot().await;
        task.cleanup().await;

        saved.with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(snapshot)
    }

    /// Limite di tempo per file, in base alla dimensione
    fn time_limit(size: u64) -> Duration {
        match SizeClass::classify(size) {
            SizeClass::Small => Duration::from_secs(60),
            SizeClass::Medium => Duration::from_secs(300),
            SizeClass::Large => Duration::from_secs(1200),
        }
    }

    /// Stampa statistiche finali
    fn print_final_stats(&self, stats: &OptimizationStats, duration: f64) {
        if self.config.json_output {
            JsonMessage::complete(stats, duration).emit();
        } else {
            info!("=== Optimization Complete ===");
            info!("Files processed: {}", stats.files_processed);
            info!("Files optimized: {}", stats.files_optimized);
            info!("Files with no savings: {}", stats.files_skipped);
            info!("Files failed: {}", stats.files_failed);
            info!("Errors: {}", stats.errors);
            info!("Bytes saved: {}", FileManager::format_size(stats.total_bytes_saved));
            info!("Average reduction: {:.2}%", stats.overall_reduction_percent());
            info!("Duration: {:.1}s", duration);
        }
    }
}
