use anyhow::Result;

use crate::frame::{Frame, FrameSource};

// One cycle of the synthetic conveyor, in frames.
const IDLE_FRAMES: u64 = 40;
const ENTER_FRAMES: u64 = 20;
const LINGER_FRAMES: u64 = 60;
const LEAVE_FRAMES: u64 = 20;
const CYCLE_FRAMES: u64 = IDLE_FRAMES + ENTER_FRAMES + LINGER_FRAMES + LEAVE_FRAMES;

const OBJECT_RGB: [u8; 3] = [220, 180, 40];

/// Deterministic conveyor scene.
///
/// A static background; periodically an object slides in from the left,
/// wobbles in the middle of the frame, then slides out to the right. The
/// object never stands still while visible, so frame differencing sees it
/// for the whole pass.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    background: Vec<u8>,
    frame_count: u64,
    released: bool,
}

impl SyntheticSource {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            background: background(width, height),
            frame_count: 0,
            released: false,
        }
    }

    /// Left edge of the object for a 1-based frame number, `None` while idle.
    fn object_x(&self, frame: u64) -> Option<i64> {
        let size = self.object_size() as i64;
        let width = self.width as i64;
        let centre = (width - size) / 2;
        let t = (frame - 1) % CYCLE_FRAMES;
        if t < IDLE_FRAMES {
            return None;
        }
        let t = t - IDLE_FRAMES;
        if t < ENTER_FRAMES {
            let travelled = (centre + size) * (t as i64 + 1) / ENTER_FRAMES as i64;
            return Some(-size + travelled);
        }
        let t = t - ENTER_FRAMES;
        if t < LINGER_FRAMES {
            let wobble = (size / 8).max(1);
            let offset = if t % 2 == 0 { wobble } else { -wobble };
            return Some(centre + offset);
        }
        let t = t - LINGER_FRAMES;
        let travelled = (width - centre) * (t as i64 + 1) / LEAVE_FRAMES as i64;
        Some(centre + travelled)
    }

    fn object_size(&self) -> u32 {
        (self.height / 3).max(1)
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let mut pixels = self.background.clone();
        let Some(left) = self.object_x(frame) else {
            return pixels;
        };
        let size = self.object_size() as i64;
        let top = (self.height as i64 - size) / 2;
        let x0 = left.max(0);
        let x1 = (left + size).min(self.width as i64);
        for y in top.max(0)..(top + size).min(self.height as i64) {
            for x in x0..x1 {
                let i = ((y * self.width as i64 + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&OBJECT_RGB);
            }
        }
        pixels
    }
}

fn background(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let shade = 60 + ((x + y) % 16) as u8;
            pixels.extend_from_slice(&[shade, shade, shade + 10]);
        }
    }
    pixels
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{} ({}x{})", self.name, self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.render(self.frame_count);
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn release(&mut self) {
        if !self.released {
            log::info!("released {}", self.describe());
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_frames_are_identical() {
        let mut source = SyntheticSource::new("t", 64, 48);
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert_eq!(a.pixels(), b.pixels());
        assert_eq!(b.index, 2);
    }

    #[test]
    fn object_moves_every_frame_while_visible() {
        let source = SyntheticSource::new("t", 64, 48);
        let first_visible = IDLE_FRAMES + 1;
        let last_visible = CYCLE_FRAMES;
        for frame in first_visible..last_visible {
            assert_ne!(source.object_x(frame), source.object_x(frame + 1), "frame {}", frame);
        }
        assert!(source.object_x(CYCLE_FRAMES + 1).is_none());
    }

    #[test]
    fn released_source_ends_stream() {
        let mut source = SyntheticSource::new("t", 16, 12);
        source.next_frame().unwrap();
        source.release();
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_captured(), 1);
    }
}
