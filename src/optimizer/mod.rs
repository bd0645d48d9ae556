//! # Optimizer Module
//!
//! Orchestrazione di molti `FileTask` per il binario:
//! - `batch_optimizer`: discovery, code condivise, ciclo di vita dei file
//! - `progress_tracker`: progress bar, statistiche ed eventi JSON

pub mod batch_optimizer;
pub mod progress_tracker;

pub use batch_optimizer::BatchOptimizer;
pub use progress_tracker::ProgressTracker;
