//! Motion gate.
//!
//! Single-step frame differencing: each frame is compared against the one
//! before it, never against an accumulated background. Slow drift is not
//! motion. Grayscale uses BT.601 luma weights (0.299, 0.587, 0.114).

use std::time::Instant;

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::{filter, morphology};

use crate::config::MotionSettings;
use crate::frame::Frame;

/// Edge reported by one observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionTransition {
    None,
    /// Inactive → active; onset was set to the observation instant.
    Started,
    /// Active → inactive; onset was cleared.
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionObservation {
    pub active: bool,
    /// Fraction of pixels marked changed after dilation.
    pub changed_ratio: f32,
    /// Start of the current motion episode, `None` while inactive.
    pub onset: Option<Instant>,
    pub transition: MotionTransition,
}

pub struct MotionGate {
    settings: MotionSettings,
    baseline: Option<GrayImage>,
    active: bool,
    onset: Option<Instant>,
}

impl MotionGate {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            settings,
            baseline: None,
            active: false,
            onset: None,
        }
    }

    /// Compare `frame` with the previous frame and update the motion state.
    ///
    /// The first frame, or the first after a resolution change, only seeds
    /// the baseline and reports inactive.
    pub fn observe(&mut self, frame: &Frame, now: Instant) -> MotionObservation {
        let current = self.smoothed_gray(frame);

        let changed_ratio = match self.baseline.take() {
            Some(baseline) if baseline.dimensions() == current.dimensions() => {
                self.changed_ratio(&baseline, &current)
            }
            _ => {
                if self.active {
                    log::debug!("motion baseline reset on frame {}", frame.index);
                }
                self.baseline = Some(current);
                return self.update(false, 0.0, now);
            }
        };
        self.baseline = Some(current);

        let active = changed_ratio > self.settings.area_ratio;
        self.update(active, changed_ratio, now)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn onset(&self) -> Option<Instant> {
        self.onset
    }

    fn update(&mut self, active: bool, changed_ratio: f32, now: Instant) -> MotionObservation {
        let transition = match (self.active, active) {
            (false, true) => {
                self.onset = Some(now);
                MotionTransition::Started
            }
            (true, false) => {
                self.onset = None;
                MotionTransition::Ended
            }
            _ => MotionTransition::None,
        };
        self.active = active;
        MotionObservation {
            active,
            changed_ratio,
            onset: self.onset,
            transition,
        }
    }

    fn smoothed_gray(&self, frame: &Frame) -> GrayImage {
        let luma: Vec<u8> = frame
            .pixels()
            .chunks_exact(3)
            .map(|px| luma_bt601(px[0], px[1], px[2]))
            .collect();
        // Frame::from_rgb guarantees the length; fall back to an empty image.
        let gray = GrayImage::from_raw(frame.width, frame.height, luma)
            .unwrap_or_else(|| GrayImage::new(0, 0));
        if gray.width() == 0 || gray.height() == 0 {
            return gray;
        }
        filter::gaussian_blur_f32(&gray, self.settings.blur_sigma)
    }

    fn changed_ratio(&self, baseline: &GrayImage, current: &GrayImage) -> f32 {
        let (width, height) = current.dimensions();
        let total = width as usize * height as usize;
        if total == 0 {
            return 0.0;
        }
        let threshold = self.settings.pixel_threshold;
        let mask = GrayImage::from_fn(width, height, |x, y| {
            let a = baseline.get_pixel(x, y).0[0];
            let b = current.get_pixel(x, y).0[0];
            if a.abs_diff(b) > threshold {
                image::Luma([255u8])
            } else {
                image::Luma([0u8])
            }
        });
        let mask = if self.settings.dilation > 0 {
            morphology::dilate(&mask, Norm::LInf, self.settings.dilation)
        } else {
            mask
        };
        let changed = mask.as_raw().iter().filter(|&&p| p != 0).count();
        changed as f32 / total as f32
    }
}

/// Rounded integer BT.601 luma.
fn luma_bt601(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    ((weighted + 500) / 1000) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const W: u32 = 64;
    const H: u32 = 48;

    fn plain(value: u8, index: u64) -> Frame {
        Frame::from_rgb(vec![value; (W * H * 3) as usize], W, H, index).unwrap()
    }

    /// Dark frame with a bright square whose top-left corner is at (x, y).
    fn with_block(x: u32, y: u32, size: u32, index: u64) -> Frame {
        let mut data = vec![10u8; (W * H * 3) as usize];
        for row in y..(y + size).min(H) {
            for col in x..(x + size).min(W) {
                let i = ((row * W + col) * 3) as usize;
                data[i..i + 3].copy_from_slice(&[240, 240, 240]);
            }
        }
        Frame::from_rgb(data, W, H, index).unwrap()
    }

    #[test]
    fn first_frame_only_seeds_baseline() {
        let mut gate = MotionGate::new(MotionSettings::default());
        let obs = gate.observe(&with_block(10, 10, 20, 1), Instant::now());
        assert!(!obs.active);
        assert_eq!(obs.transition, MotionTransition::None);
        assert_eq!(obs.changed_ratio, 0.0);
    }

    #[test]
    fn static_scene_stays_inactive() {
        let mut gate = MotionGate::new(MotionSettings::default());
        let now = Instant::now();
        for i in 1..5 {
            let obs = gate.observe(&plain(80, i), now);
            assert!(!obs.active);
        }
        assert!(gate.onset().is_none());
    }

    #[test]
    fn appearing_object_starts_and_ends_episode() {
        let mut gate = MotionGate::new(MotionSettings::default());
        let t0 = Instant::now();
        gate.observe(&plain(10, 1), t0);

        let t1 = t0 + Duration::from_millis(100);
        let obs = gate.observe(&with_block(20, 14, 20, 2), t1);
        assert!(obs.active, "ratio {}", obs.changed_ratio);
        assert_eq!(obs.transition, MotionTransition::Started);
        assert_eq!(obs.onset, Some(t1));

        // Object moves: still active, onset kept.
        let obs = gate.observe(&with_block(30, 14, 20, 3), t1 + Duration::from_millis(100));
        assert!(obs.active);
        assert_eq!(obs.transition, MotionTransition::None);
        assert_eq!(obs.onset, Some(t1));

        // Object stops: single-step differencing sees no change.
        let obs = gate.observe(&with_block(30, 14, 20, 4), t1 + Duration::from_millis(200));
        assert!(!obs.active);
        assert_eq!(obs.transition, MotionTransition::Ended);
        assert!(obs.onset.is_none());
    }

    #[test]
    fn change_below_area_ratio_is_ignored() {
        let mut settings = MotionSettings::default();
        settings.dilation = 0;
        settings.area_ratio = 0.5;
        let mut gate = MotionGate::new(settings);
        let now = Instant::now();
        gate.observe(&plain(10, 1), now);
        let obs = gate.observe(&with_block(0, 0, 16, 2), now);
        assert!(obs.changed_ratio > 0.0);
        assert!(!obs.active);
    }

    #[test]
    fn resolution_change_reseeds_baseline() {
        let mut gate = MotionGate::new(MotionSettings::default());
        let now = Instant::now();
        gate.observe(&plain(10, 1), now);
        let other = Frame::from_rgb(vec![200u8; 32 * 24 * 3], 32, 24, 2).unwrap();
        let obs = gate.observe(&other, now);
        assert!(!obs.active);
        assert_eq!(obs.changed_ratio, 0.0);
    }

    #[test]
    fn luma_uses_bt601_weights() {
        assert_eq!(luma_bt601(255, 0, 0), 76);
        assert_eq!(luma_bt601(0, 255, 0), 150);
        assert_eq!(luma_bt601(0, 0, 255), 29);
        assert_eq!(luma_bt601(255, 255, 255), 255);
    }

    #[test]
    fn red_change_is_judged_with_bt601_luma() {
        // Luma 36 under BT.601 (changed), 26 under Rec.709 (unchanged).
        let mut gate = MotionGate::new(MotionSettings::default());
        let now = Instant::now();
        gate.observe(&plain(0, 1), now);
        let mut data = vec![0u8; (W * H * 3) as usize];
        for px in data.chunks_exact_mut(3) {
            px[0] = 120;
        }
        let red = Frame::from_rgb(data, W, H, 2).unwrap();
        let obs = gate.observe(&red, now + Duration::from_millis(100));
        assert!(obs.active);
        assert_eq!(obs.transition, MotionTransition::Started);
    }
}
