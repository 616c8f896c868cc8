//! Zone geometry.
//!
//! Zones are axis-aligned rectangles in image pixel coordinates. The two
//! built-in disposal zones are defined against a 1280x720 reference frame and
//! must be scaled to the actual image before any containment test.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Width of the frame the built-in zones are defined against.
pub const REFERENCE_WIDTH: u32 = 1280;
/// Height of the frame the built-in zones are defined against.
pub const REFERENCE_HEIGHT: u32 = 720;

/// Bound on any box coordinate. Detector output is clamped to
/// `[-MAX_COORD, MAX_COORD]` so box arithmetic stays far from `i32` overflow.
pub const MAX_COORD: i32 = 1 << 24;

pub const LEFT_ZONE: &str = "left";
pub const RIGHT_ZONE: &str = "right";

/// Axis-aligned rectangle `(x1, y1)-(x2, y2)` in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Positive-area overlap. Rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        intersects(self, other)
    }

    /// Shift both corners by `(dx, dy)`, saturating at the `i32` range.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x1: self.x1.saturating_add(dx),
            y1: self.y1.saturating_add(dy),
            x2: self.x2.saturating_add(dx),
            y2: self.y2.saturating_add(dy),
        }
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Rect {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    fn scaled(&self, width: u32, height: u32) -> Rect {
        let sx = |v: i32| (v as i64 * width as i64 / REFERENCE_WIDTH as i64) as i32;
        let sy = |v: i32| (v as i64 * height as i64 / REFERENCE_HEIGHT as i64) as i32;
        Rect {
            x1: sx(self.x1),
            y1: sy(self.y1),
            x2: sx(self.x2),
            y2: sy(self.y2),
        }
    }
}

impl From<[i32; 4]> for Rect {
    fn from(v: [i32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

/// Strict positive-area overlap test.
///
/// `a.x1 < b.x2 && a.x2 > b.x1 && a.y1 < b.y2 && a.y2 > b.y1`
pub fn intersects(a: &Rect, b: &Rect) -> bool {
    a.x1 < b.x2 && a.x2 > b.x1 && a.y1 < b.y2 && a.y2 > b.y1
}

/// A disposal zone: a rectangle plus the waste types that belong there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub rect: Rect,
    pub label: String,
    pub correct_types: Vec<String>,
}

impl Zone {
    pub fn accepts(&self, waste_type: &str) -> bool {
        self.correct_types.iter().any(|t| t == waste_type)
    }
}

/// The pair of built-in zones. Order is significant: `left` is tested first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneSet {
    pub left: Zone,
    pub right: Zone,
}

impl ZoneSet {
    /// Built-in zones in the 1280x720 reference frame.
    pub fn reference() -> Self {
        Self {
            left: Zone {
                name: LEFT_ZONE.to_string(),
                rect: Rect::new(0, 0, 426, 720),
                label: "Paper/Cardboard".to_string(),
                correct_types: vec!["paper".to_string(), "cardboard".to_string()],
            },
            right: Zone {
                name: RIGHT_ZONE.to_string(),
                rect: Rect::new(854, 0, 1280, 720),
                label: "Plastic/Metal/Glass".to_string(),
                correct_types: vec![
                    "plastic".to_string(),
                    "metal".to_string(),
                    "glass".to_string(),
                ],
            },
        }
    }

    /// Built-in zones scaled to an image of the given size.
    pub fn for_image(width: u32, height: u32) -> Self {
        scale(&Self::reference(), width, height)
    }

    /// Zones in membership-test order.
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        [&self.left, &self.right].into_iter()
    }
}

/// Rescale a zone set from the reference frame to `width x height`.
///
/// Identity when the image already matches the reference frame. Coordinates
/// are truncated toward zero after scaling.
pub fn scale(zones: &ZoneSet, width: u32, height: u32) -> ZoneSet {
    if width == REFERENCE_WIDTH && height == REFERENCE_HEIGHT {
        return zones.clone();
    }
    let rescale = |zone: &Zone| Zone {
        rect: zone.rect.scaled(width, height),
        ..zone.clone()
    };
    ZoneSet {
        left: rescale(&zones.left),
        right: rescale(&zones.right),
    }
}

/// Sub-image bounded by `rect`, clipped to the image bounds.
///
/// Returns the clipped rectangle together with the crop so callers can map
/// crop-local coordinates back to the frame. `None` when nothing is left after
/// clipping.
pub fn crop(image: &DynamicImage, rect: &Rect) -> Option<(Rect, DynamicImage)> {
    let clipped = rect.clip(image.width(), image.height());
    if clipped.is_empty() {
        return None;
    }
    let cropped = image.crop_imm(
        clipped.x1 as u32,
        clipped.y1 as u32,
        clipped.width() as u32,
        clipped.height() as u32,
    );
    Some((clipped, cropped))
}
