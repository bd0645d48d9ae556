//! # ImageOptim Task Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare della libreria
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `task`: Il `FileTask`, unità di coordinamento per singolo file
//! - `worker`: Strategie di ottimizzazione e protocollo dei worker
//! - `queue`: Code di esecuzione (CPU e I/O) iniettate nel task
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom
//! - `file_manager`: Operazioni sui file, discovery e classificazione
//! - `tool_resolver`: Ricerca dei tool esterni
//! - `optimizer`: Orchestratore di un batch di file
//! - `progress` / `json_output`: Progress bar, statistiche ed eventi JSON
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use imageoptim_task::{Config, FileTask, TaskQueue};
//!
//! let config = Config::default();
//! let cpu = TaskQueue::new("cpu", config.cpu_workers);
//! let io = TaskQueue::new("io", config.io_workers);
//!
//! let task = FileTask::create(&path, &config).await?;
//! task.enqueue_workers(&cpu, &io).await?;
//! task.wait_until_done().await;
//! println!("{}", task.status_text().await);
//! ```

pub mod config;
pub mod error;
pub mod file_manager;
pub mod json_output;
pub mod optimizer;
pub mod progress;
pub mod queue;
pub mod task;
pub mod tool_resolver;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::OptimizeError;
pub use file_manager::{FileKind, FileManager};
pub use optimizer::BatchOptimizer;
pub use queue::{Affinity, ManualQueue, TaskQueue, WorkerQueue};
pub use task::{FileSnapshot, FileTask, Status};
pub use worker::{Strategy, WorkerReport};
