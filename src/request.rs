// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Request and result value types.
//!
//! An [`ImageRequest`] describes one decode job: source file, target size,
//! rotation angle, cache policy, priority, and the requesting client. Once
//! submitted it is owned by the manager until a worker consumes it.
//!
//! De-duplication identity is `(path, size, client)` — see [`RequestKey`].
//! `angle` is deliberately not part of the key: a later request for a
//! different angle on the same key replaces the pending job, so the latest
//! request for a slot wins.

use std::path::PathBuf;

use image::RgbaImage;

use crate::client::{ClientHandle, ClientId};

/// Normalize an angle in degrees to `[0, 360)`.
pub fn normalize_angle(angle: i32) -> u32 {
    angle.rem_euclid(360) as u32
}

/// One decode job. Pure data, immutable after construction.
#[derive(Clone, Debug)]
pub struct ImageRequest {
    /// Source image file on disk.
    pub path: PathBuf,
    /// Target bounding box; `None` means full resolution, no scaling.
    pub size: Option<(u32, u32)>,
    /// Rotation in degrees, normalized to `[0, 360)`, applied before scaling.
    pub angle: u32,
    /// Whether a successful decode should be written to the disk cache.
    pub cache: bool,
    /// Priority requests are serviced before any queued non-priority request,
    /// but never preempt a request already being decoded.
    pub priority: bool,
    /// Handle of the requesting client.
    pub client: ClientHandle,
}

impl ImageRequest {
    pub fn new(
        path: impl Into<PathBuf>,
        size: Option<(u32, u32)>,
        angle: i32,
        client: &ClientHandle,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            angle: normalize_angle(angle),
            cache: false,
            priority: false,
            client: client.clone(),
        }
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// The de-duplication identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            path: self.path.clone(),
            size: self.size,
            client: self.client.id(),
        }
    }
}

/// De-duplication key: at most one queued job exists per key, and a second
/// submission while the first is in flight is dropped.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub path: PathBuf,
    pub size: Option<(u32, u32)>,
    pub client: ClientId,
}

/// The outcome of one decode job. Produced exactly once per request that was
/// not dropped as stale; ownership transfers to the client callback.
#[derive(Clone, Debug)]
pub struct ImageResult {
    /// Source file the request named.
    pub path: PathBuf,
    /// Normalized rotation that was applied.
    pub angle: u32,
    /// Dimensions actually produced (after rotation and scaling).
    pub size: (u32, u32),
    /// Native dimensions of the source, useful even when scaled.
    /// `(0, 0)` when the source could not be read at all.
    pub full_size: (u32, u32),
    /// Decoded raster. A placeholder when `loaded_ok` is false.
    pub image: RgbaImage,
    /// Whether the source decoded successfully.
    pub loaded_ok: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::ImageClient;

    struct NullClient;

    impl ImageClient for NullClient {
        fn image_loaded(&self, _result: ImageResult) {}
    }

    fn handle() -> ClientHandle {
        ClientHandle::new(&Arc::new(NullClient))
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(0), 0);
        assert_eq!(normalize_angle(90), 90);
        assert_eq!(normalize_angle(360), 0);
        assert_eq!(normalize_angle(450), 90);
        assert_eq!(normalize_angle(-90), 270);
        assert_eq!(normalize_angle(-360), 0);
    }

    #[test]
    fn test_request_normalizes_angle_at_construction() {
        let h = handle();
        let req = ImageRequest::new("a.png", Some((128, 128)), -90, &h);
        assert_eq!(req.angle, 270);
    }

    #[test]
    fn test_key_ignores_angle_and_priority() {
        let h = handle();
        let a = ImageRequest::new("a.png", Some((128, 128)), 0, &h);
        let b = ImageRequest::new("a.png", Some((128, 128)), 90, &h).with_priority(true);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_path_size_and_client() {
        let h = handle();
        let base = ImageRequest::new("a.png", Some((128, 128)), 0, &h);
        let other_path = ImageRequest::new("b.png", Some((128, 128)), 0, &h);
        let other_size = ImageRequest::new("a.png", Some((256, 256)), 0, &h);
        let other_client = ImageRequest::new("a.png", Some((128, 128)), 0, &handle());
        assert_ne!(base.key(), other_path.key());
        assert_ne!(base.key(), other_size.key());
        assert_ne!(base.key(), other_client.key());
    }
}
