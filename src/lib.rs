// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Asynchronous thumbnail decoding pipeline with an on-disk cache.
//!
//! A caller constructs an [`ImageRequest`] and hands it to the [`Manager`],
//! which de-duplicates, orders by priority, and wakes a background
//! [`Worker`]. The worker tries the disk cache, otherwise decodes the
//! source, rotates and scales it, and writes the cache entry back. Finished
//! results queue inside the manager until whichever context owns the
//! clients drains them with [`Manager::poll_deliveries`], so client
//! callbacks never run on the decode thread and a dropped client never
//! hears back.
//!
//! ```no_run
//! use std::sync::Arc;
//! use thumbq::{ClientHandle, ImageClient, ImageRequest, ImageResult, Manager, StdDecoder, Worker, WorkerOptions};
//!
//! struct Grid;
//! impl ImageClient for Grid {
//!     fn image_loaded(&self, result: ImageResult) {
//!         println!("{}: {}x{}", result.path.display(), result.size.0, result.size.1);
//!     }
//! }
//!
//! let manager = Arc::new(Manager::new());
//! let worker = Worker::spawn(Arc::clone(&manager), Arc::new(StdDecoder), WorkerOptions::default());
//! let grid = Arc::new(Grid);
//! let handle = ClientHandle::new(&grid);
//!
//! manager.submit(ImageRequest::new("photos/beach.jpg", Some((128, 128)), 0, &handle).with_cache(true));
//! loop {
//!     if manager.poll_deliveries() > 0 {
//!         break;
//!     }
//! }
//! manager.request_exit();
//! worker.join();
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod decoder;
pub mod manager;
pub mod request;
pub mod worker;

pub use client::{ClientHandle, ClientId, ImageClient};
pub use config::Config;
pub use decoder::{ImageDecoder, StdDecoder};
pub use manager::{Manager, StopScope};
pub use request::{ImageRequest, ImageResult, RequestKey};
pub use worker::{Worker, WorkerOptions};
