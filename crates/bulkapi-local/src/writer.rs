//! Atomic artifact writing and rotation (spec.md §4.7): gzip-compressed UTF-8 JSON written to
//! a temp file and renamed into place, with the previous artifact (if any) renamed aside to
//! `<base>-YYYY-MM-DD-HH-MM.json.gz`, timestamped from *that file's own mtime* (spec.md §3,
//! §8 scenario 7), not from the time of the new write.

use bulkapi_core::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `value` as gzip-compressed JSON to `path`, atomically. If `path` already exists it is
/// first renamed aside to `<base>-<mtime-formatted>.json.gz`, where `<base>` is `path` with its
/// `.json.gz` suffix stripped and the timestamp is the existing file's own modification time;
/// the new content is then written to `<path>.tmp` and renamed over `path`.
pub fn write_atomic(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Pipeline(e.to_string()))?;
    }

    if path.exists() {
        let backup = rotation_path(path)?;
        std::fs::rename(path, &backup).map_err(|e| Error::Pipeline(e.to_string()))?;
    }

    let json = serde_json::to_vec(value).map_err(|e| Error::Decode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| Error::Pipeline(e.to_string()))?;
    let compressed = encoder.finish().map_err(|e| Error::Pipeline(e.to_string()))?;

    let tmp = path.with_file_name(format!(
        "{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
    ));
    std::fs::write(&tmp, &compressed).map_err(|e| Error::Pipeline(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::Pipeline(e.to_string()))?;
    Ok(())
}

/// Strip a trailing `.json.gz` (or, failing that, any single extension) from a file name,
/// giving the `<base>` that spec.md's `<base>-YYYY-MM-DD-HH-MM.json.gz` rotation pattern is
/// built from.
fn base_name(file_name: &str) -> &str {
    file_name
        .strip_suffix(".json.gz")
        .unwrap_or_else(|| file_name.split('.').next().unwrap_or(file_name))
}

fn rotation_path(path: &Path) -> Result<PathBuf> {
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| Error::Pipeline(e.to_string()))?;
    let stamp = chrono::DateTime::<chrono::Local>::from(mtime).format("%Y-%m-%d-%H-%M");
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let base = base_name(file_name);
    Ok(path.with_file_name(format!("{base}-{stamp}.json.gz")))
}
