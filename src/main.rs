// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Thumbnail pre-builder CLI.
//!
//! Walks the given files/directories, pushes one cache-persisting request
//! per image through the pipeline, and waits for all deliveries. Running it
//! ahead of time means a browsing UI later gets cache hits for the whole
//! collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use thumbq::decoder::is_image_file;
use thumbq::{
    ClientHandle, Config, ImageClient, ImageRequest, ImageResult, Manager, StdDecoder, Worker,
};

#[derive(Parser, Debug)]
#[command(
    name = "thumbq",
    about = "Pre-build the on-disk thumbnail cache for a set of images"
)]
struct Cli {
    /// Image file(s) and/or directory path(s)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Thumbnail width in pixels (default from config)
    #[arg(long)]
    width: Option<u32>,

    /// Thumbnail height in pixels (default from config)
    #[arg(long)]
    height: Option<u32>,

    /// Rotation in degrees, applied before scaling
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    angle: i32,

    /// Number of decode threads (default from config)
    #[arg(long)]
    threads: Option<usize>,
}

fn collect_images_from_path(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        if is_image_file(path) {
            return Ok(vec![path.to_path_buf()]);
        } else {
            anyhow::bail!("Not a supported image file: {:?}", path);
        }
    }

    if path.is_dir() {
        let mut images: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        images.sort();
        if images.is_empty() {
            anyhow::bail!("No image files found in directory: {:?}", path);
        }
        return Ok(images);
    }

    anyhow::bail!("Path does not exist: {:?}", path);
}

fn collect_images(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();
    for p in paths {
        out.extend(collect_images_from_path(p)?);
    }
    // De-dupe while preserving order (e.g. overlapping directories/globs).
    let mut seen = std::collections::HashSet::<PathBuf>::new();
    out.retain(|p| seen.insert(p.clone()));
    if out.is_empty() {
        anyhow::bail!("No image files found");
    }
    Ok(out)
}

#[derive(Default)]
struct BuildProgress {
    done: AtomicUsize,
    failed: AtomicUsize,
}

impl ImageClient for BuildProgress {
    fn image_loaded(&self, result: ImageResult) {
        if result.loaded_ok {
            self.done.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            eprintln!("failed to decode: {}", result.path.display());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();
    let images = collect_images(&cli.paths)?;
    let total = images.len();

    let size = (
        cli.width.unwrap_or(config.thumb_width),
        cli.height.unwrap_or(config.thumb_height),
    );
    let threads = cli.threads.unwrap_or(config.decode_threads).clamp(1, 8);

    let manager = Arc::new(Manager::new());
    let progress = Arc::new(BuildProgress::default());
    let handle = ClientHandle::new(&progress);

    for path in images {
        manager.submit(
            ImageRequest::new(path, Some(size), cli.angle, &handle).with_cache(true),
        );
    }

    let decoder: Arc<dyn thumbq::ImageDecoder> = Arc::new(StdDecoder);
    let workers: Vec<Worker> = (0..threads)
        .map(|_| {
            Worker::spawn(
                Arc::clone(&manager),
                Arc::clone(&decoder),
                config.worker_options(),
            )
        })
        .collect();

    let mut delivered = 0;
    while delivered < total {
        delivered += manager.poll_deliveries();
        std::thread::sleep(Duration::from_millis(5));
    }
    manager.request_exit();
    for worker in workers {
        worker.join();
    }

    let done = progress.done.load(Ordering::Relaxed);
    let failed = progress.failed.load(Ordering::Relaxed);
    println!(
        "{done} thumbnails built ({}x{}), {failed} failed",
        size.0, size.1
    );
    if failed > 0 {
        anyhow::bail!("{failed} of {total} images failed to decode");
    }
    Ok(())
}
