use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::frame::{Frame, FrameSource};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays still images from a local directory in file-name order.
///
/// Images that do not match the configured resolution are resized. An
/// unreadable image is a source failure and ends the stream with an error.
pub struct ImageDirSource {
    dir: PathBuf,
    width: u32,
    height: u32,
    pending: VecDeque<PathBuf>,
    frame_count: u64,
}

impl ImageDirSource {
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no .jpg/.jpeg/.png images in {}", dir.display()));
        }
        files.sort();
        log::info!("image source {}: {} frames", dir.display(), files.len());
        Ok(Self {
            dir: dir.to_path_buf(),
            width,
            height,
            pending: files.into(),
            frame_count: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn describe(&self) -> String {
        format!("{} ({}x{})", self.dir.display(), self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let mut rgb = image::open(&path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        if rgb.dimensions() != (self.width, self.height) {
            rgb = imageops::resize(&rgb, self.width, self.height, FilterType::Triangle);
        }
        self.frame_count += 1;
        Frame::from_rgb(rgb.into_raw(), self.width, self.height, self.frame_count).map(Some)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn release(&mut self) {
        self.pending.clear();
    }
}
