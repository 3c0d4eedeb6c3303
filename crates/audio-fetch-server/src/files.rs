//! Output file naming helpers.
//!
//! Turns display titles into safe base names and picks destination paths that
//! do not clobber files already in the output directory.

use std::path::{Path, PathBuf};

/// Base name used when a title has nothing usable left in it.
pub const FALLBACK_BASE_NAME: &str = "audio";

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\r', '\n'];
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Map an arbitrary display title to a filesystem-safe base name.
pub fn sanitize_filename(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return FALLBACK_BASE_NAME.to_string();
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|ch| !RESERVED_CHARS.contains(ch))
        .collect();
    if cleaned.trim().is_empty() {
        return FALLBACK_BASE_NAME.to_string();
    }
    cleaned
}

/// Return `dir/base.ext`, or a timestamped sibling when that path is taken.
///
/// A taken timestamped name gets a numeric suffix (`base-<stamp>-2.ext`), so a
/// path that exists at call time is never returned. The existence check and the
/// later write are not atomic; two requests that race on the same name may
/// still collide.
pub fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    unique_path_stamped(dir, base, ext, &stamp)
}

fn unique_path_stamped(dir: &Path, base: &str, ext: &str, stamp: &str) -> PathBuf {
    let full = dir.join(format!("{base}.{ext}"));
    if is_free(&full) {
        return full;
    }
    let stamped = dir.join(format!("{base}-{stamp}.{ext}"));
    if is_free(&stamped) {
        return stamped;
    }
    (2u32..)
        .map(|n| dir.join(format!("{base}-{stamp}-{n}.{ext}")))
        .find(|candidate| is_free(candidate))
        .unwrap_or(stamped)
}

// Missing or unreadable: let the open that follows report permissions.
fn is_free(path: &Path) -> bool {
    std::fs::metadata(path).is_err()
}

/// Create the output directory and any missing parents.
pub async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

/// MIME type for the audio containers the extractor and transcoder produce.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "m4a" | "mp4" => "audio/mp4",
        "webm" => "audio/webm",
        "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// File name component of a path, lossily converted for display.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
