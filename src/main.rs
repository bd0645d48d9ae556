//! # ImageOptim Task - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Caricamento della configurazione (file JSON, poi override da CLI)
//! - Avvio del `BatchOptimizer`
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (path, workers, livello PNG, etc.)
//! 2. Configura il logging su stderr (INFO o DEBUG a seconda del flag verbose)
//! 3. Carica il config file se presente e applica gli override
//! 4. Istanzia BatchOptimizer e avvia il processo di ottimizzazione
//!
//! ## Esempio di utilizzo:
//! ```bash
//! imageoptim-task ~/Pictures --cpu-workers 8 --keep-metadata --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use imageoptim_task::json_output::JsonMessage;
use imageoptim_task::progress::OptimizationStats;
use imageoptim_task::{BatchOptimizer, Config};

#[derive(Parser)]
#[command(name = "imageoptim-task")]
#[command(about = "Losslessly optimize images by racing several tools per file")]
struct Args {
    /// Files or directories to optimize
    #[arg(required_unless_present = "save_config")]
    paths: Vec<PathBuf>,

    /// Parallel jobs on the CPU queue
    #[arg(long)]
    cpu_workers: Option<usize>,

    /// Parallel jobs on the I/O queue
    #[arg(long)]
    io_workers: Option<usize>,

    /// PNG optimization level (0-6)
    #[arg(long)]
    png_level: Option<u8>,

    /// Keep metadata (EXIF, comments, color profiles)
    #[arg(long)]
    keep_metadata: bool,

    /// Strategy to skip (repeatable), e.g. --disable pngcrush
    #[arg(long = "disable", value_name = "STRATEGY")]
    disabled: Vec<String>,

    /// Directory for temporary candidate files (default: next to each image)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Dry run - don't actually replace files
    #[arg(long)]
    dry_run: bool,

    /// Output progress and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Config file (default: <config dir>/imageoptim-task/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// CLI flags win over file values
    fn apply_to(&self, config: &mut Config) {
        if let Some(cpu_workers) = self.cpu_workers {
            config.cpu_workers = cpu_workers;
        }
        if let Some(io_workers) = self.io_workers {
            config.io_workers = io_workers;
        }
        if let Some(png_level) = self.png_level {
            config.png_level = png_level;
        }
        if self.keep_metadata {
            config.strip_metadata = false;
        }
        if self.temp_dir.is_some() {
            config.temp_dir = self.temp_dir.clone();
        }
        config.disabled_strategies.extend(self.disabled.iter().cloned());
        config.dry_run |= self.dry_run;
        config.json_output |= self.json;
    }
}

async fn run(config: Config, paths: &[PathBuf]) -> Result<OptimizationStats> {
    let optimizer = BatchOptimizer::new(config)?;
    optimizer.run(paths).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --json keeps stdout clean
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.config.clone().or_else(Config::default_path);
    let mut config = match &config_path {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    args.apply_to(&mut config);

    if args.save_config {
        let path = config_path.ok_or_else(|| anyhow::anyhow!("No config directory available"))?;
        config.validate()?;
        config.save_to_file(&path).await?;
        info!("Configuration saved to {}", path.display());
        return Ok(());
    }

    let json_output = config.json_output;
    let result = run(config, &args.paths).await;

    if let Err(ref e) = result {
        if json_output {
            JsonMessage::error(e.to_string(), Some(format!("{:#}", e))).emit();
        } else {
            error!("{:#}", e);
        }
    }

    result.map(|_| ())
}
