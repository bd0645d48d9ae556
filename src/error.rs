//! # Error Types Module
//!
//! Questo modulo definisce i tipi di errore della libreria.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` per categorizzare gli errori dei FileTask
//! - Distingue errori di setup (file mancante, non leggibile, dimensione ignota)
//!   dagli errori di contratto (task occupato, worker già accodati)
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Nota:
//! Gli errori dei singoli worker NON passano da qui: vengono registrati sul
//! task e comunicati solo tramite lo `status`.
//!
//! ## Esempio:
//! ```rust,ignore
//! match FileTask::create(&path, &config).await {
//!     Err(OptimizeError::NotFound(p)) => warn!("gone: {}", p.display()),
//!     other => { /* ... */ }
//! }
//! ```

use std::path::PathBuf;

/// Custom error types for file task coordination
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File is not readable: {}: {source}", .path.display())]
    NotReadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to determine file size: {}", .0.display())]
    SizeUnavailable(PathBuf),

    #[error("File task is busy: {0} workers still active")]
    Busy(usize),

    #[error("Workers were already enqueued for {}", .0.display())]
    AlreadyEnqueued(PathBuf),

    #[error("File task has not finished yet: {}", .0.display())]
    NotDone(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OptimizeError::NotFound(PathBuf::from("/tmp/missing.png"));
        assert_eq!(err.to_string(), "File not found: /tmp/missing.png");

        let err = OptimizeError::Busy(2);
        assert!(err.to_string().contains("2 workers"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err: OptimizeError = io.into();
        assert!(matches!(err, OptimizeError::Io(_)));
    }
}
