//! Native strategy: drop whatever follows the container's end marker.
//!
//! Cameras, editors and broken uploaders regularly append junk after the
//! image data. Removing it is lossless and needs no external tool, only a
//! read and a write, so it runs on the I/O queue.

use super::{is_disk_full, remove_candidate, Strategy, WorkerContext, WorkerInput, WorkerReport};
use crate::file_manager::FileKind;
use tracing::debug;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub(super) async fn run(input: &WorkerInput, ctx: &mut WorkerContext) -> WorkerReport {
    let data = match tokio::fs::read(&input.source).await {
        Ok(data) => data,
        Err(e) => return WorkerReport::fatal(format!("Source unreadable: {}", e)),
    };
    ctx.progress(0.5).await;

    let end = match content_end(input.kind, &data) {
        Some(end) => end,
        None => {
            return WorkerReport::failed(format!(
                "{}: no {} end marker found",
                Strategy::StripTrailing,
                input.kind.extension()
            ))
        }
    };

    if end >= data.len() {
        return WorkerReport::NoImprovement;
    }
    debug!(
        "{} has {} trailing bytes",
        input.source.display(),
        data.len() - end
    );

    if ctx.should_stop() {
        return WorkerReport::NoImprovement;
    }

    let output = match input.create_candidate(Strategy::StripTrailing) {
        Ok(path) => path,
        Err(e) if is_disk_full(&e) => return WorkerReport::fatal(format!("Disk full: {}", e)),
        Err(e) => return WorkerReport::failed(format!("Cannot create temp output: {}", e)),
    };

    if let Err(e) = tokio::fs::write(&output, &data[..end]).await {
        remove_candidate(&output).await;
        return if is_disk_full(&e) {
            WorkerReport::fatal(format!("Disk full: {}", e))
        } else {
            WorkerReport::failed(format!("Cannot write temp output: {}", e))
        };
    }

    input.evaluate_candidate(output, Strategy::StripTrailing).await
}

/// Offset one past the last byte that belongs to the image
pub(super) fn content_end(kind: FileKind, data: &[u8]) -> Option<usize> {
    match kind {
        FileKind::Jpeg => jpeg_end(data),
        FileKind::Png => png_end(data),
        FileKind::Gif => gif_end(data),
        FileKind::Webp => webp_end(data),
        FileKind::Unknown => None,
    }
}

/// Last EOI marker; embedded EXIF thumbnails carry their own, so take the final one
fn jpeg_end(data: &[u8]) -> Option<usize> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    data.windows(2)
        .rposition(|pair| pair == [0xFF, 0xD9])
        .map(|pos| pos + 2)
}

/// Walk chunks up to and including IEND
fn png_end(data: &[u8]) -> Option<usize> {
    if !data.starts_with(PNG_SIGNATURE) {
        return None;
    }

    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= data.len() {
        let length = u32::from_be_bytes(data[offset..offset + 4].try_into().ok()?) as usize;
        let chunk_type = &data[offset + 4..offset + 8];
        let next = offset.checked_add(12)?.checked_add(length)?;
        if next > data.len() {
            return None;
        }
        if chunk_type == b"IEND" {
            return Some(next);
        }
        offset = next;
    }
    None
}

/// Trailer byte 0x3B
fn gif_end(data: &[u8]) -> Option<usize> {
    if !data.starts_with(b"GIF8") {
        return None;
    }
    data.iter().rposition(|&b| b == 0x3B).map(|pos| pos + 1)
}

/// RIFF length header, padded to even size
fn webp_end(data: &[u8]) -> Option<usize> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return None;
    }
    let riff_size = u32::from_le_bytes(data[4..8].try_into().ok()?) as usize;
    let end = 8 + riff_size + (riff_size & 1);
    if end > data.len() {
        return None;
    }
    Some(end)
}
