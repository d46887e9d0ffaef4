// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Decode worker thread.
//!
//! Each worker performs the expensive work:
//! - try the disk cache (the entry is already sized and rotated)
//! - otherwise decode the source image
//! - rotate, then scale down to fit the target (never upscale)
//! - write the cache entry best-effort
//!
//! One worker is enough for a desktop workload, but several may pull from
//! the same manager; `next()` hands out each request exactly once.
//!
//! A decode failure never stops the loop: the request completes with a
//! placeholder raster and `loaded_ok = false` so the client always has
//! something renderable.

use std::io::Write as _;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::cache;
use crate::decoder::ImageDecoder;
use crate::manager::Manager;
use crate::request::{ImageRequest, ImageResult};

/// Raster produced when decoding fails and the request has no target size.
const PLACEHOLDER_DEFAULT_SIZE: (u32, u32) = (128, 128);

const PLACEHOLDER_FILL: Rgba<u8> = Rgba([128, 128, 128, 255]);
const PLACEHOLDER_CORNER: Rgba<u8> = Rgba([230, 230, 230, 255]);
const PLACEHOLDER_EDGE: Rgba<u8> = Rgba([64, 64, 64, 255]);

#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
    pub resize_filter: FilterType,
    /// Append per-request timings to `thumbq_worker.log` in the temp dir.
    pub trace: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            resize_filter: FilterType::Triangle,
            trace: false,
        }
    }
}

pub struct Worker {
    handle: JoinHandle<()>,
}

impl Worker {
    /// Start a decode thread pulling from `manager`. The thread exits after
    /// `Manager::request_exit`.
    pub fn spawn(
        manager: Arc<Manager>,
        decoder: Arc<dyn ImageDecoder>,
        options: WorkerOptions,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("thumbq-decode".into())
            .spawn(move || {
                while let Some(request) = manager.next() {
                    let result = process_request(&request, decoder.as_ref(), &options);
                    manager.finish(request, result);
                }
            })
            .expect("failed to spawn decode worker");
        Self { handle }
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

/// Run the full decode pipeline for one request. Infallible by design;
/// failures yield a placeholder result.
pub fn process_request(
    request: &ImageRequest,
    decoder: &dyn ImageDecoder,
    options: &WorkerOptions,
) -> ImageResult {
    let start = Instant::now();

    // Cache hit: the stored entry was produced by this exact pipeline for
    // this exact key, so no further rotation or scaling applies.
    if request.cache
        && let Some(size) = request.size
        && let Some(cached) = cache::load(&request.path, size, request.angle)
    {
        // The entry does not record the source's native size; the header
        // read is cheap compared to a decode.
        let full_size =
            image::image_dimensions(&request.path).unwrap_or((cached.width(), cached.height()));
        if options.trace {
            trace_line(&format!(
                "cache-hit path={:?} size={:?} angle={} elapsed={:?}",
                request.path,
                request.size,
                request.angle,
                start.elapsed()
            ));
        }
        return ImageResult {
            path: request.path.clone(),
            angle: request.angle,
            size: cached.dimensions(),
            full_size,
            image: cached,
            loaded_ok: true,
        };
    }

    let Some(decoded) = decoder.decode(&request.path) else {
        if options.trace {
            trace_line(&format!(
                "decode-failed path={:?} elapsed={:?}",
                request.path,
                start.elapsed()
            ));
        }
        return failed_result(request);
    };
    let decode_elapsed = start.elapsed();
    let full_size = (decoded.width(), decoded.height());

    let rotated = rotate(decoded, request.angle);
    let scaled = match request.size {
        Some(max) => {
            let orig = (rotated.width(), rotated.height());
            let target = scaled_size(orig, max);
            if target != orig {
                // `scaled_size` already did the aspect fit; `resize` would
                // fit a second time and round the short edge down again.
                rotated.resize_exact(target.0, target.1, options.resize_filter)
            } else {
                rotated
            }
        }
        None => rotated,
    };
    let image = scaled.to_rgba8();

    if request.cache && let Some(size) = request.size {
        // Best-effort: a full disk or missing permissions must not fail the
        // request; the next request for this key just re-decodes.
        if let Err(err) = cache::store(&request.path, size, request.angle, &image)
            && options.trace
        {
            trace_line(&format!(
                "cache-write-failed path={:?} err={err:#}",
                request.path
            ));
        }
    }

    if options.trace {
        trace_line(&format!(
            "decoded path={:?} full={:?} out={:?} angle={} decode={:?} total={:?}",
            request.path,
            full_size,
            image.dimensions(),
            request.angle,
            decode_elapsed,
            start.elapsed()
        ));
    }

    ImageResult {
        path: request.path.clone(),
        angle: request.angle,
        size: image.dimensions(),
        full_size,
        image,
        loaded_ok: true,
    }
}

/// Quarter-turn rotation. 90 and 270 swap width and height. A normalized
/// angle that is not a multiple of 90 passes through unrotated; the callers
/// in this domain only ever request EXIF orientations.
fn rotate(img: DynamicImage, angle: u32) -> DynamicImage {
    match angle {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Contain `orig` within `max`, preserving aspect ratio, shrink-only: a
/// thumbnail is never upscaled beyond the source's native resolution.
pub fn scaled_size(orig: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (orig_w, orig_h) = orig;
    let (max_w, max_h) = max;
    if orig_w <= max_w && orig_h <= max_h {
        return (orig_w, orig_h);
    }
    let scale_w = max_w as f64 / orig_w as f64;
    let scale_h = max_h as f64 / orig_h as f64;
    let scale = scale_w.min(scale_h);
    (
        (orig_w as f64 * scale).floor().max(1.0) as u32,
        (orig_h as f64 * scale).floor().max(1.0) as u32,
    )
}

fn failed_result(request: &ImageRequest) -> ImageResult {
    let image = placeholder(request.size);
    ImageResult {
        path: request.path.clone(),
        angle: request.angle,
        size: image.dimensions(),
        full_size: (0, 0),
        image,
        loaded_ok: false,
    }
}

/// Gray fill with a torn top-right corner, so a failed decode still renders
/// as a recognizable "broken image" cell instead of a blank.
pub fn placeholder(size: Option<(u32, u32)>) -> RgbaImage {
    let (w, h) = size.unwrap_or(PLACEHOLDER_DEFAULT_SIZE);
    let (w, h) = (w.max(8), h.max(8));
    let mut img = RgbaImage::from_pixel(w, h, PLACEHOLDER_FILL);
    let corner = (w.min(h) / 4).max(2);
    for dy in 0..corner {
        let run = corner - dy;
        for dx in 0..run {
            let color = if dx == run - 1 {
                PLACEHOLDER_EDGE
            } else {
                PLACEHOLDER_CORNER
            };
            img.put_pixel(w - 1 - dx, dy, color);
        }
    }
    img
}

fn trace_line(line: &str) {
    let path = std::env::temp_dir().join("thumbq_worker.log");
    if let Ok(mut f) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        let _ = writeln!(f, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::client::{ClientHandle, ImageClient};
    use crate::decoder::StdDecoder;
    use crate::manager::StopScope;

    /// Counts how often the underlying decoder touches an original file.
    struct CountingDecoder {
        decodes: AtomicUsize,
    }

    impl CountingDecoder {
        fn new() -> Self {
            Self {
                decodes: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.decodes.load(Ordering::SeqCst)
        }
    }

    impl ImageDecoder for CountingDecoder {
        fn decode(&self, path: &Path) -> Option<DynamicImage> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            StdDecoder.decode(path)
        }
    }

    /// Hands back a fixed raster for any path; lets rotation and scaling be
    /// tested without touching the filesystem.
    struct FixedDecoder(DynamicImage);

    impl ImageDecoder for FixedDecoder {
        fn decode(&self, _path: &Path) -> Option<DynamicImage> {
            Some(self.0.clone())
        }
    }

    struct OrderedClient {
        delivered: Mutex<Vec<ImageResult>>,
    }

    impl OrderedClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    impl ImageClient for OrderedClient {
        fn image_loaded(&self, result: ImageResult) {
            self.delivered.lock().unwrap().push(result);
        }
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 23 % 256) as u8, (y * 41 % 256) as u8, 55, 255])
        });
        img.save_with_format(path, image::ImageFormat::Png).unwrap();
    }

    fn no_client_request(path: PathBuf, size: Option<(u32, u32)>, angle: i32) -> ImageRequest {
        let client = OrderedClient::new();
        let handle = ClientHandle::new(&client);
        ImageRequest::new(path, size, angle, &handle)
    }

    /// Drain deliveries until `expected` results arrived or the deadline
    /// passes.
    fn drain(manager: &Manager, expected: usize, deadline: Duration) -> usize {
        let start = Instant::now();
        let mut total = 0;
        while total < expected && start.elapsed() < deadline {
            total += manager.poll_deliveries();
            thread::sleep(Duration::from_millis(2));
        }
        total
    }

    #[test]
    fn test_scaled_size_shrinks_preserving_aspect() {
        let result = scaled_size((2000, 1000), (800, 600));
        assert!(result.0 <= 800 && result.1 <= 600);
        let orig_ratio = 2000.0 / 1000.0;
        let result_ratio = result.0 as f64 / result.1 as f64;
        assert!((orig_ratio - result_ratio).abs() < 0.01);
    }

    #[test]
    fn test_scaled_size_never_upscales() {
        assert_eq!(scaled_size((100, 50), (800, 600)), (100, 50));
    }

    #[test]
    fn test_scaled_size_degenerate_minimum() {
        assert_eq!(scaled_size((10000, 10), (100, 100)), (100, 1));
    }

    #[test]
    fn test_placeholder_is_non_empty_and_sized() {
        let img = placeholder(Some((64, 32)));
        assert_eq!(img.dimensions(), (64, 32));
        assert_eq!(*img.get_pixel(0, 31), PLACEHOLDER_FILL);
        // The torn corner is visible in the top-right.
        assert_ne!(*img.get_pixel(63, 0), PLACEHOLDER_FILL);
    }

    #[test]
    fn test_placeholder_default_size() {
        assert_eq!(placeholder(None).dimensions(), PLACEHOLDER_DEFAULT_SIZE);
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let decoder = FixedDecoder(DynamicImage::ImageRgba8(RgbaImage::new(6, 4)));
        let options = WorkerOptions::default();

        let req = no_client_request(PathBuf::from("x.png"), None, 90);
        let result = process_request(&req, &decoder, &options);
        assert!(result.loaded_ok);
        assert_eq!(result.size, (4, 6));
        assert_eq!(result.full_size, (6, 4));

        let req = no_client_request(PathBuf::from("x.png"), None, 180);
        assert_eq!(process_request(&req, &decoder, &options).size, (6, 4));

        let req = no_client_request(PathBuf::from("x.png"), None, 270);
        assert_eq!(process_request(&req, &decoder, &options).size, (4, 6));
    }

    #[test]
    fn test_rotation_happens_before_scaling() {
        // 40x8 rotated 90 becomes 8x40, then fits (16, 16) as 3x16.
        let decoder = FixedDecoder(DynamicImage::ImageRgba8(RgbaImage::new(40, 8)));
        let req = no_client_request(PathBuf::from("x.png"), Some((16, 16)), 90);
        let result = process_request(&req, &decoder, &WorkerOptions::default());
        assert_eq!(result.size, (3, 16));
        assert_eq!(result.full_size, (40, 8));
    }

    #[test]
    fn test_missing_source_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let req = no_client_request(dir.path().join("absent.png"), Some((32, 32)), 0);
        let result = process_request(&req, &StdDecoder, &WorkerOptions::default());
        assert!(!result.loaded_ok);
        assert_eq!(result.full_size, (0, 0));
        assert_eq!(result.image.dimensions(), (32, 32));
    }

    #[test]
    fn test_cache_round_trip_decodes_original_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_png(&source, 40, 24);

        let decoder = CountingDecoder::new();
        let options = WorkerOptions::default();
        let req = no_client_request(source.clone(), Some((20, 20)), 0).with_cache(true);

        let first = process_request(&req, &decoder, &options);
        assert!(first.loaded_ok);
        assert_eq!(decoder.count(), 1);

        let second = process_request(&req, &decoder, &options);
        assert!(second.loaded_ok);
        assert_eq!(decoder.count(), 1, "second request must hit the cache");
        assert_eq!(
            second.image, first.image,
            "cache hit must be pixel-identical"
        );
        assert_eq!(second.full_size, (40, 24));
    }

    #[test]
    fn test_uncached_request_skips_cache_write() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_png(&source, 16, 16);

        let req = no_client_request(source.clone(), Some((8, 8)), 0);
        process_request(&req, &StdDecoder, &WorkerOptions::default());
        assert!(cache::load(&source, (8, 8), 0).is_none());
    }

    #[test]
    fn test_full_resolution_request_is_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_png(&source, 16, 16);

        let req = no_client_request(source.clone(), None, 0).with_cache(true);
        let result = process_request(&req, &StdDecoder, &WorkerOptions::default());
        assert!(result.loaded_ok);
        assert_eq!(result.size, (16, 16));
        assert!(!cache::cache_dir(&source).exists());
    }

    #[test]
    fn test_worker_delivers_placeholder_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(Manager::new());
        let client = OrderedClient::new();
        let handle = ClientHandle::new(&client);

        manager.submit(ImageRequest::new(
            dir.path().join("absent.png"),
            Some((32, 32)),
            0,
            &handle,
        ));
        let worker = Worker::spawn(
            Arc::clone(&manager),
            Arc::new(StdDecoder),
            WorkerOptions::default(),
        );

        assert_eq!(drain(&manager, 1, Duration::from_secs(10)), 1);
        {
            let delivered = client.delivered.lock().unwrap();
            assert!(!delivered[0].loaded_ok);
            assert!(delivered[0].image.width() > 0);
        }

        manager.request_exit();
        worker.join();
    }

    #[test]
    fn test_stopped_client_gets_no_callback_from_worker() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_png(&source, 16, 16);

        let manager = Arc::new(Manager::new());
        let client = OrderedClient::new();
        let handle = ClientHandle::new(&client);

        manager.submit(ImageRequest::new(&source, Some((8, 8)), 0, &handle));
        manager.stop(handle.id(), StopScope::All);

        let worker = Worker::spawn(
            Arc::clone(&manager),
            Arc::new(StdDecoder),
            WorkerOptions::default(),
        );
        // Nothing should ever arrive; give the worker a moment anyway.
        assert_eq!(drain(&manager, 1, Duration::from_millis(200)), 0);
        assert!(client.delivered.lock().unwrap().is_empty());

        manager.request_exit();
        worker.join();
    }

    #[test]
    fn test_bulk_scenario_priority_first_then_all_cache_hits() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=50 {
            write_png(&dir.path().join(format!("img{i:03}.png")), 24, 16);
        }
        let urgent = dir.path().join("img999.png");
        write_png(&urgent, 48, 32);

        let manager = Arc::new(Manager::new());
        let decoder = Arc::new(CountingDecoder::new());
        let client = OrderedClient::new();
        let handle = ClientHandle::new(&client);

        for i in 1..=50 {
            manager.submit(
                ImageRequest::new(
                    dir.path().join(format!("img{i:03}.png")),
                    Some((128, 128)),
                    0,
                    &handle,
                )
                .with_cache(true),
            );
        }
        manager.submit(
            ImageRequest::new(&urgent, Some((256, 256)), 0, &handle)
                .with_cache(true)
                .with_priority(true),
        );

        let worker = Worker::spawn(
            Arc::clone(&manager),
            Arc::clone(&decoder) as Arc<dyn ImageDecoder>,
            WorkerOptions::default(),
        );

        assert_eq!(drain(&manager, 51, Duration::from_secs(30)), 51);
        {
            let delivered = client.delivered.lock().unwrap();
            assert_eq!(
                delivered[0].path, urgent,
                "priority request must land first"
            );
            assert!(delivered.iter().all(|r| r.loaded_ok));
        }
        assert_eq!(decoder.count(), 51);

        // Same 50 again: every one must be satisfied from the cache.
        for i in 1..=50 {
            manager.submit(
                ImageRequest::new(
                    dir.path().join(format!("img{i:03}.png")),
                    Some((128, 128)),
                    0,
                    &handle,
                )
                .with_cache(true),
            );
        }
        assert_eq!(drain(&manager, 50, Duration::from_secs(30)), 50);
        assert_eq!(decoder.count(), 51, "re-submission must not re-decode");

        manager.request_exit();
        worker.join();
    }
}
