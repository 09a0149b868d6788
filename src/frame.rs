//! Frames and the pull-based source contract.
//!
//! - `Frame`: one RGB24 image plus its capture instant. Pixels are read-only
//!   once captured.
//! - `FrameSource`: lazy sequence of frames. `Ok(None)` is end of stream,
//!   `Err` is a source failure; both end the frame loop.

use anyhow::{anyhow, Result};
use std::time::Instant;

/// Default capture width requested from sources.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default capture height requested from sources.
pub const DEFAULT_HEIGHT: u32 = 480;

/// A captured RGB24 frame.
///
/// There is no `Clone`: the pipeline buffers at most one frame at a time and
/// stages only ever borrow it.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sequence number assigned by the source, starting at 1.
    pub index: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap RGB24 bytes. Fails when the buffer does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    /// Override the capture instant (replayed footage, tests).
    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Read-only RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pull-based frame producer.
///
/// A source is restartable per session: `release` frees the device, and a
/// fresh source must be opened for the next session.
pub trait FrameSource {
    /// Human-readable identifier used in logs.
    fn describe(&self) -> String;

    /// Produce the next frame, `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Number of frames produced so far.
    fn frames_captured(&self) -> u64;

    /// Release the underlying device or file handles.
    fn release(&mut self) {}
}
