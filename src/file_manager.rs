//! # File Management Module
//!
//! Questo modulo gestisce tutte le operazioni sui file usate dai FileTask.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di immagini in directory
//! - Determinazione formato file (magic bytes, poi estensione)
//! - Classificazione per dimensione (piccolo / medio / grande)
//! - Sostituzione sicura del file originale con backup
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - **Immagini**: JPG, JPEG, PNG, GIF, WebP
//!
//! ## Sicurezza operazioni:
//! - Backup automatico prima della sostituzione
//! - Rollback in caso di errore durante la sostituzione
//!
//! ## Esempio:
//! ```rust,ignore
//! let files = FileManager::find_image_files(Path::new("/path/to/images"))?;
//! for file in files {
//!     let kind = FileManager::detect_kind(&file).await;
//! }
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{error, warn};
use walkdir::WalkDir;

/// Files under this size are "small" (nothing left to gain from slow tools)
pub const SMALL_FILE_BYTES: u64 = 2 * 1024;
/// Files over this size are "large" (brute-force tools are skipped)
pub const LARGE_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Image container detected for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Unknown,
}

impl FileKind {
    /// Guess from the file extension alone
    pub fn from_extension(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        match ext.as_deref() {
            Some("jpg") | Some("jpeg") => Self::Jpeg,
            Some("png") => Self::Png,
            Some("gif") => Self::Gif,
            Some("webp") => Self::Webp,
            _ => Self::Unknown,
        }
    }

    /// Guess from the leading bytes of the file
    pub fn from_magic(header: &[u8]) -> Self {
        match image::guess_format(header) {
            Ok(image::ImageFormat::Jpeg) => Self::Jpeg,
            Ok(image::ImageFormat::Png) => Self::Png,
            Ok(image::ImageFormat::Gif) => Self::Gif,
            Ok(image::ImageFormat::WebP) => Self::Webp,
            _ => Self::Unknown,
        }
    }

    /// Extension used for candidate output files
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Unknown => "tmp",
        }
    }
}

/// Classificazione dei file per dimensione
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,  // < 2KB
    Medium,
    Large,  // > 5MB
}

impl SizeClass {
    /// Classifica un file in base alla sua dimensione
    pub fn classify(size_bytes: u64) -> Self {
        if size_bytes < SMALL_FILE_BYTES {
            Self::Small
        } else if size_bytes > LARGE_FILE_BYTES {
            Self::Large
        } else {
            Self::Medium
        }
    }
}

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Byte size of a file, `None` if it cannot be determined
    pub async fn get_file_size(path: &Path) -> Option<u64> {
        fs::metadata(path).await.ok().map(|metadata| metadata.len())
    }

    /// Detect the image kind, preferring magic bytes over the extension
    pub async fn detect_kind(path: &Path) -> FileKind {
        let mut header = [0u8; 32];
        let read = match fs::File::open(path).await {
            Ok(mut file) => file.read(&mut header).await.unwrap_or(0),
            Err(_) => 0,
        };

        match FileKind::from_magic(&header[..read]) {
            FileKind::Unknown => FileKind::from_extension(path),
            kind => kind,
        }
    }

    /// Find all supported image files under a path (a file is returned as-is)
    pub fn find_image_files(root: &Path) -> Result<Vec<PathBuf>> {
        if root.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }
        if !root.exists() {
            return Err(anyhow::anyhow!("Path does not exist: {}", root.display()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if Self::is_supported_format(path) && !Self::is_candidate_output(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Check if a file format is supported
    pub fn is_supported_format(path: &Path) -> bool {
        FileKind::from_extension(path) != FileKind::Unknown
    }

    /// Leftover candidate outputs from an interrupted run must not be re-optimized
    pub fn is_candidate_output(path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().starts_with(".optim-"))
            .unwrap_or(false)
    }

    /// Camera-style file names such as `IMG_1234.JPG` or `DSC01234.jpg`
    pub fn looks_like_camera_name(path: &Path) -> bool {
        const PREFIXES: &[&str] = &["IMG_", "DSCF", "DSCN", "DSC_", "DSC", "DJI_", "GOPR", "PXL_", "P"];

        let stem = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_uppercase(),
            None => return false,
        };

        PREFIXES.iter().any(|prefix| {
            stem.strip_prefix(prefix)
                .map(|rest| rest.len() >= 4 && rest.chars().take(4).all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
    }

    /// Safely replace a file with its optimized version
    pub async fn replace_file(original: &Path, optimized: &Path) -> std::io::Result<()> {
        let backup_path = original.with_extension(format!(
            "{}.backup",
            original.extension().unwrap_or_default().to_string_lossy()
        ));

        fs::copy(original, &backup_path).await?;

        match fs::copy(optimized, original).await {
            Ok(_) => {
                if let Err(e) = fs::remove_file(&backup_path).await {
                    warn!("Failed to remove backup {}: {}", backup_path.display(), e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Failed to replace {}: {}", original.display(), e);
                Self::restore_backup(&backup_path, original).await?;
                Err(e)
            }
        }
    }

    /// Copia il backup sopra l'originale. Il backup viene rimosso solo se la
    /// copia riesce; altrimenti resta su disco e l'errore ne riporta il path.
    async fn restore_backup(backup_path: &Path, original: &Path) -> std::io::Result<()> {
        if let Err(e) = fs::copy(backup_path, original).await {
            error!(
                "Could not restore {}, original kept at {}: {}",
                original.display(),
                backup_path.display(),
                e
            );
            return Err(std::io::Error::new(
                e.kind(),
                format!(
                    "restore of {} failed ({}), original kept at {}",
                    original.display(),
                    e,
                    backup_path.display()
                ),
            ));
        }

        if let Err(e) = fs::remove_file(backup_path).await {
            warn!("Failed to remove backup {}: {}", backup_path.display(), e);
        }
        Ok(())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(FileKind::from_extension(Path::new("a.JPEG")), FileKind::Jpeg);
        assert_eq!(FileKind::from_extension(Path::new("a.png")), FileKind::Png);
        assert_eq!(FileKind::from_extension(Path::new("a.gif")), FileKind::Gif);
        assert_eq!(FileKind::from_extension(Path::new("a.webp")), FileKind::Webp);
        assert_eq!(FileKind::from_extension(Path::new("a.txt")), FileKind::Unknown);
        assert_eq!(FileKind::from_extension(Path::new("noext")), FileKind::Unknown);
    }

    #[tokio::test]
    async fn test_magic_bytes_win_over_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("actually_png.jpg");
        std::fs::write(&path, PNG_MAGIC).unwrap();
        assert_eq!(FileManager::detect_kind(&path).await, FileKind::Png);

        let text = dir.path().join("plain.gif");
        std::fs::write(&text, b"hello").unwrap();
        assert_eq!(FileManager::detect_kind(&text).await, FileKind::Gif);
    }

    #[test]
    fn test_size_class() {
        assert_eq!(SizeClass::classify(100), SizeClass::Small);
        assert_eq!(SizeClass::classify(100_000), SizeClass::Medium);
        assert_eq!(SizeClass::classify(LARGE_FILE_BYTES + 1), SizeClass::Large);
    }

    #[test]
    fn test_camera_names() {
        assert!(FileManager::looks_like_camera_name(Path::new("IMG_1234.JPG")));
        assert!(FileManager::looks_like_camera_name(Path::new("dsc01234.jpg")));
        assert!(FileManager::looks_like_camera_name(Path::new("DSCF0042.jpg")));
        assert!(!FileManager::looks_like_camera_name(Path::new("holiday.jpg")));
        assert!(!FileManager::looks_like_camera_name(Path::new("IMG_ab12.jpg")));
    }

    #[test]
    fn test_find_image_files_skips_candidates() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("sub").join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".optim-abc.png"), b"x").unwrap();

        let files = FileManager::find_image_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !FileManager::is_candidate_output(f)));
    }

    #[tokio::test]
    async fn test_replace_file() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("photo.jpg");
        let optimized = dir.path().join("photo.opt.jpg");
        std::fs::write(&original, b"original bytes").unwrap();
        std::fs::write(&optimized, b"small").unwrap();

        FileManager::replace_file(&original, &optimized).await.unwrap();

        assert_eq!(std::fs::read(&original).unwrap(), b"small");
        assert!(!dir.path().join("photo.jpg.backup").exists());
    }

    #[tokio::test]
    async fn test_replace_file_failure_keeps_original() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("photo.jpg");
        std::fs::write(&original, b"original bytes").unwrap();

        // a directory cannot be copied, so the write step fails
        let result = FileManager::replace_file(&original, dir.path()).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&original).unwrap(), b"original bytes");
        assert!(!dir.path().join("photo.jpg.backup").exists());
    }

    #[tokio::test]
    async fn test_failed_restore_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("photo.jpg.backup");
        std::fs::write(&backup, b"original bytes").unwrap();
        let unreachable = dir.path().join("gone").join("photo.jpg");

        let err = FileManager::restore_backup(&backup, &unreachable).await.unwrap_err();

        assert_eq!(std::fs::read(&backup).unwrap(), b"original bytes");
        assert!(err.to_string().contains(&backup.display().to_string()));
    }

    #[tokio::test]
    async fn test_restore_removes_backup() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("photo.jpg");
        let backup = dir.path().join("photo.jpg.backup");
        std::fs::write(&original, b"trunc").unwrap();
        std::fs::write(&backup, b"original bytes").unwrap();

        FileManager::restore_backup(&backup, &original).await.unwrap();

        assert_eq!(std::fs::read(&original).unwrap(), b"original bytes");
        assert!(!backup.exists());
    }

    #[test]
    fn test_format_size_and_reduction() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(2048), "2.00 KB");
        assert_eq!(FileManager::calculate_reduction(1000, 900), 10.0);
        assert_eq!(FileManager::calculate_reduction(0, 0), 0.0);
    }
}
