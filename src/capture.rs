use std::fmt;
use std::time::Instant;

use display_info::DisplayInfo;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use xcap::{Monitor, Window};

use crate::error::CaptureError;

/// Represents a screen region to capture, in screen coordinates
///
/// `x`/`y` are signed because secondary monitors may sit left of or above the
/// primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// True when `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.width, self.height)
    }
}

/// A still image of a region, stamped with the instant it was grabbed
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self::at(image, Instant::now())
    }

    pub fn at(image: RgbaImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Luma conversion used by every match strategy
    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Check the frame has exactly the region's declared dimensions
    pub fn ensure_matches(&self, region: &Region) -> Result<(), CaptureError> {
        if self.width() == region.width && self.height() == region.height {
            Ok(())
        } else {
            Err(CaptureError::DimensionMismatch {
                expected_width: region.width,
                expected_height: region.height,
                actual_width: self.width(),
                actual_height: self.height(),
            })
        }
    }
}

/// Anything that can produce a frame of a screen region on demand
///
/// Implementations must not cache: every call reflects the screen at the moment
/// of the call. They must not move the cursor or steal focus.
pub trait CaptureSource: Send {
    fn capture(&mut self, region: &Region) -> Result<Frame, CaptureError>;

    /// Rectangles of the attached displays. Empty when unknown, in which case
    /// region validation only checks for a positive size.
    fn display_bounds(&self) -> Vec<Region> {
        Vec::new()
    }
}

/// Screen capture backed by `xcap`
///
/// # Platform-Specific Implementation
///
/// ## macOS
/// - Requires Screen Recording permission (System Settings > Privacy & Security > Screen Recording)
/// - Retina displays report a device scale of 2; the crop is taken in physical
///   pixels and resized back to the region's logical size
///
/// ## Windows
/// - Uses the desktop duplication path inside `xcap`, no special permissions
///
/// ## Linux
/// - X11 works out of the box; Wayland depends on the compositor's portal
///
/// # Performance Notes
/// - The whole monitor is grabbed and then cropped, typically 5-20ms per call
pub struct ScreenCapture {
    target_window: Option<String>,
}

impl ScreenCapture {
    pub fn new() -> Self {
        Self { target_window: None }
    }

    /// Fail captures with `TargetMinimized` while the window whose title
    /// contains `title` is minimized
    pub fn with_target_window(title: Option<String>) -> Self {
        Self {
            target_window: title.filter(|t| !t.trim().is_empty()),
        }
    }

    fn check_target_window(&self) -> Result<(), CaptureError> {
        let Some(target) = self.target_window.as_deref() else {
            return Ok(());
        };

        let windows = Window::all().map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        let window = windows
            .into_iter()
            .find(|w| w.title().map(|t| t.contains(target)).unwrap_or(false))
            .ok_or_else(|| CaptureError::TargetNotFound(target.to_string()))?;

        if window.is_minimized().unwrap_or(false) {
            return Err(CaptureError::TargetMinimized(target.to_string()));
        }
        Ok(())
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

fn monitor_bounds(monitor: &Monitor) -> Option<Region> {
    Some(Region::new(
        monitor.x().ok()?,
        monitor.y().ok()?,
        monitor.width().ok()?,
        monitor.height().ok()?,
    ))
}

impl CaptureSource for ScreenCapture {
    fn capture(&mut self, region: &Region) -> Result<Frame, CaptureError> {
        self.check_target_window()?;

        let monitors = Monitor::all().map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        if monitors.is_empty() {
            return Err(CaptureError::NoDisplays);
        }

        let (monitor, bounds) = monitors
            .into_iter()
            .find_map(|m| {
                let bounds = monitor_bounds(&m)?;
                bounds.contains(region).then_some((m, bounds))
            })
            .ok_or(CaptureError::OutOfBounds(*region))?;

        let screen = monitor
            .capture_image()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        let captured_at = Instant::now();

        // Physical pixels per logical pixel; 1.0 on unscaled displays
        let scale = if bounds.width > 0 {
            screen.width() as f64 / bounds.width as f64
        } else {
            1.0
        };

        let px = (((region.x - bounds.x) as f64) * scale).round() as u32;
        let py = (((region.y - bounds.y) as f64) * scale).round() as u32;
        let pw = ((region.width as f64) * scale).round().max(1.0) as u32;
        let ph = ((region.height as f64) * scale).round().max(1.0) as u32;
        if px + pw > screen.width() || py + ph > screen.height() {
            return Err(CaptureError::OutOfBounds(*region));
        }

        let mut cropped = imageops::crop_imm(&screen, px, py, pw, ph).to_image();
        if (pw, ph) != (region.width, region.height) {
            cropped = imageops::resize(&cropped, region.width, region.height, FilterType::Triangle);
        }

        let frame = Frame::at(cropped, captured_at);
        frame.ensure_matches(region)?;
        Ok(frame)
    }

    fn display_bounds(&self) -> Vec<Region> {
        match DisplayInfo::all() {
            Ok(displays) => displays
                .iter()
                .map(|d| Region::new(d.x, d.y, d.width, d.height))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to query display bounds: {}", e);
                Vec::new()
            }
        }
    }
}

/// Plays back a fixed list of capture outcomes, one per call
///
/// Once the list is exhausted the last entry repeats. Used for dry runs and by
/// the test suite.
pub struct ReplayCapture {
    outcomes: Vec<Result<RgbaImage, CaptureError>>,
    cursor: usize,
    bounds: Vec<Region>,
}

impl ReplayCapture {
    pub fn new(outcomes: Vec<Result<RgbaImage, CaptureError>>) -> Self {
        Self {
            outcomes,
            cursor: 0,
            bounds: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: Vec<Region>) -> Self {
        self.bounds = bounds;
        self
    }

    /// Number of captures served so far
    pub fn served(&self) -> usize {
        self.cursor
    }
}

impl CaptureSource for ReplayCapture {
    fn capture(&mut self, region: &Region) -> Result<Frame, CaptureError> {
        let last = self.outcomes.len().checked_sub(1).ok_or(CaptureError::NoDisplays)?;
        let outcome = self.outcomes[self.cursor.min(last)].clone();
        self.cursor += 1;

        let frame = Frame::new(outcome?);
        frame.ensure_matches(region)?;
        Ok(frame)
    }

    fn display_bounds(&self) -> Vec<Region> {
        self.bounds.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_region_creation() {
        let region = Region::new(10, 20, 300, 150);
        assert_eq!(region.x, 10);
        assert_eq!(region.y, 20);
        assert_eq!(region.width, 300);
        assert_eq!(region.height, 150);
        assert_eq!(region.to_string(), "[10, 20, 300, 150]");
    }

    #[test]
    fn test_region_contains() {
        let screen = Region::new(0, 0, 1920, 1080);
        assert!(screen.contains(&Region::new(0, 980, 1920, 100)));
        assert!(!screen.contains(&Region::new(0, 1000, 1920, 100)));
        assert!(!screen.contains(&Region::new(-5, 0, 10, 10)));

        let left_monitor = Region::new(-1280, 0, 1280, 1024);
        assert!(left_monitor.contains(&Region::new(-200, 100, 100, 40)));
    }

    #[test]
    fn test_frame_dimension_check() {
        let frame = Frame::new(RgbaImage::from_pixel(100, 40, Rgba([0, 0, 0, 255])));
        assert!(frame.ensure_matches(&Region::new(0, 0, 100, 40)).is_ok());
        assert_eq!(
            frame.ensure_matches(&Region::new(0, 0, 100, 41)),
            Err(CaptureError::DimensionMismatch {
                expected_width: 100,
                expected_height: 41,
                actual_width: 100,
                actual_height: 40,
            })
        );
    }

    #[test]
    fn test_replay_repeats_last_outcome() {
        let region = Region::new(0, 0, 4, 4);
        let mut source = ReplayCapture::new(vec![
            Err(CaptureError::TargetMinimized("game".into())),
            Ok(RgbaImage::new(4, 4)),
        ]);

        assert!(source.capture(&region).is_err());
        assert!(source.capture(&region).is_ok());
        assert!(source.capture(&region).is_ok());
        assert_eq!(source.served(), 3);
    }

    #[test]
    fn test_replay_rejects_wrong_size() {
        let mut source = ReplayCapture::new(vec![Ok(RgbaImage::new(8, 8))]);
        let result = source.capture(&Region::new(0, 0, 4, 4));
        assert!(matches!(result, Err(CaptureError::DimensionMismatch { .. })));
    }
}
