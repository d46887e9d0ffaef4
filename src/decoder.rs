// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! The decoder boundary.
//!
//! Workers treat image decoding as a black box behind [`ImageDecoder`]:
//! given a path, produce a raster or fail. [`StdDecoder`] is the default
//! implementation; tests substitute counting or fixed decoders through the
//! same seam.

use std::path::Path;

use image::DynamicImage;

/// Black-box decode capability consumed by workers.
pub trait ImageDecoder: Send + Sync {
    /// Decode the file at `path` to a raster, or `None` on any failure
    /// (missing file, unknown format, corrupt data).
    fn decode(&self, path: &Path) -> Option<DynamicImage>;
}

/// Default decoder backed by the `image` crate, with content-based format
/// sniffing so a mislabeled extension still decodes.
pub struct StdDecoder;

impl ImageDecoder for StdDecoder {
    fn decode(&self, path: &Path) -> Option<DynamicImage> {
        image::ImageReader::open(path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }
}

pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff", "tif"];

/// Extension-based filter for directory scans.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
