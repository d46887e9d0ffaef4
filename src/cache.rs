// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! On-disk thumbnail cache.
//!
//! Entries live in a `ThumbNails/` subdirectory colocated with each image's
//! own directory, named `{width}x{height}-{angle}-{original_filename}`. The
//! containing directory is therefore part of every entry path, so two source
//! files with the same base name in different directories cannot collide.
//!
//! Entries are always encoded as PNG regardless of the source format: a
//! cache hit must reproduce the exact raster the original decode produced,
//! and a lossy re-encode would not. Loads sniff the content rather than
//! trusting the file extension.
//!
//! This subsystem never evicts. External maintenance may delete a
//! `ThumbNails/` directory wholesale at any time; the next request for an
//! affected key simply re-decodes from source.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbaImage};

const CACHE_DIR_NAME: &str = "ThumbNails";

/// The cache directory colocated with `image`'s directory.
pub fn cache_dir(image: &Path) -> PathBuf {
    image
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CACHE_DIR_NAME)
}

/// Deterministic entry path for `(image, size, angle)`. `angle` must already
/// be normalized to `[0, 360)`.
pub fn entry_path(image: &Path, size: (u32, u32), angle: u32) -> PathBuf {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    cache_dir(image).join(format!("{}x{}-{}-{}", size.0, size.1, angle, name))
}

/// Read-through lookup. Returns `None` when the entry is absent or cannot be
/// decoded; a corrupt entry is indistinguishable from a miss on purpose.
pub fn load(image: &Path, size: (u32, u32), angle: u32) -> Option<RgbaImage> {
    let path = entry_path(image, size, angle);
    let reader = image::ImageReader::open(&path)
        .ok()?
        .with_guessed_format()
        .ok()?;
    Some(reader.decode().ok()?.to_rgba8())
}

/// Write-through store. Creates the cache directory lazily. Callers treat
/// failure as best-effort: a full disk must not fail the request.
pub fn store(image: &Path, size: (u32, u32), angle: u32, thumb: &RgbaImage) -> Result<()> {
    let dir = cache_dir(image);
    fs::create_dir_all(&dir)
        .with_context(|| format!("creating cache dir {}", dir.display()))?;
    let path = entry_path(image, size, angle);
    thumb
        .save_with_format(&path, ImageFormat::Png)
        .with_context(|| format!("writing cache entry {}", path.display()))?;
    Ok(())
}

/// Delete every cache entry for one source file, any size and angle. Used
/// when the source has changed and must be re-thumbnailed.
pub fn remove_thumbnails(image: &Path) -> Result<()> {
    let Some(name) = image.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };
    let suffix = format!("-{name}");
    let dir = cache_dir(image);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        // No cache directory means nothing to remove.
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let entry_name = entry.file_name();
        if entry_name.to_string_lossy().ends_with(&suffix) {
            fs::remove_file(entry.path())
                .with_context(|| format!("removing {}", entry.path().display()))?;
        }
    }
    Ok(())
}
