// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Configuration management.
//!
//! Config values are loaded with the following priority (highest to lowest):
//! 1. Environment variables (THUMBQ_*)
//! 2. Config file (~/.config/thumbq/config.toml)
//! 3. Default values

use serde::Deserialize;
use std::path::PathBuf;

use crate::worker::WorkerOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default thumbnail bounding box.
    pub thumb_width: u32,
    pub thumb_height: u32,
    /// Decode threads pulling from one manager.
    pub decode_threads: usize,
    pub resize_filter: String,
    pub trace_worker: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thumb_width: 128,
            thumb_height: 128,
            decode_threads: 2,
            resize_filter: "triangle".to_string(),
            trace_worker: false,
        }
    }
}

/// Parse filter type string to image::imageops::FilterType.
/// Returns Triangle as fallback for invalid values.
pub fn parse_filter_type(s: &str) -> image::imageops::FilterType {
    let s = s.trim();
    if s.eq_ignore_ascii_case("nearest") {
        image::imageops::FilterType::Nearest
    } else if s.eq_ignore_ascii_case("triangle") {
        image::imageops::FilterType::Triangle
    } else if s.eq_ignore_ascii_case("catmullrom") || s.eq_ignore_ascii_case("catmull-rom") {
        image::imageops::FilterType::CatmullRom
    } else if s.eq_ignore_ascii_case("gaussian") {
        image::imageops::FilterType::Gaussian
    } else if s.eq_ignore_ascii_case("lanczos3") || s.eq_ignore_ascii_case("lanczos") {
        image::imageops::FilterType::Lanczos3
    } else {
        image::imageops::FilterType::Triangle
    }
}

impl Config {
    /// Load config with priority: env vars > config file > defaults
    pub fn load() -> Self {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        config.clamp_values();
        config
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("thumbq").join("config.toml"))
    }

    fn load_from_file() -> Option<Self> {
        let path = Self::config_path()?;
        let content = std::fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = Self::parse_env::<u32>("THUMBQ_THUMB_WIDTH") {
            self.thumb_width = v;
        }
        if let Some(v) = Self::parse_env::<u32>("THUMBQ_THUMB_HEIGHT") {
            self.thumb_height = v;
        }
        if let Some(v) = Self::parse_env::<usize>("THUMBQ_DECODE_THREADS") {
            self.decode_threads = v;
        }
        if let Ok(v) = std::env::var("THUMBQ_RESIZE_FILTER") {
            self.resize_filter = v;
        }
        if std::env::var_os("THUMBQ_TRACE_WORKER").is_some() {
            self.trace_worker = true;
        }
    }

    fn clamp_values(&mut self) {
        const MIN_THUMB_DIM: u32 = 16;
        const MAX_THUMB_DIM: u32 = 4096;
        const MAX_DECODE_THREADS: usize = 8;

        self.thumb_width = self.thumb_width.clamp(MIN_THUMB_DIM, MAX_THUMB_DIM);
        self.thumb_height = self.thumb_height.clamp(MIN_THUMB_DIM, MAX_THUMB_DIM);
        self.decode_threads = self.decode_threads.clamp(1, MAX_DECODE_THREADS);
    }

    fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok()?.parse().ok()
    }

    pub fn thumb_size(&self) -> (u32, u32) {
        (self.thumb_width, self.thumb_height)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            resize_filter: parse_filter_type(&self.resize_filter),
            trace: self.trace_worker,
        }
    }
}
