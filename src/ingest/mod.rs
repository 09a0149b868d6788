//! Frame sources.
//!
//! - `stub://<name>`: deterministic synthetic conveyor scene (tests, bench)
//! - a local directory of still images, replayed in file-name order
//!
//! Sources only read local data. Frames are handed over one at a time and
//! never buffered beyond the frame being processed.

mod image_dir;
mod synthetic;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::SourceSettings;
use crate::frame::FrameSource;

/// Open the source named by `settings.uri`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if let Some(name) = uri.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(
            name,
            settings.width,
            settings.height,
        )));
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "unsupported source '{}': expected stub://<name> or a local image directory",
            uri
        ));
    }
    let path = Path::new(uri);
    if path.is_dir() {
        return Ok(Box::new(ImageDirSource::open(
            path,
            settings.width,
            settings.height,
        )?));
    }
    Err(anyhow!(
        "source '{}' is not a directory of images",
        path.display()
    ))
}
