//! Visibility normalization: clip raw render-tree boxes to what is actually
//! on screen and round them to integer pixels.

use super::rect::{BoundingBox, Point, Rect, Size};
use crate::dom::NodeId;

/// Coordinate space a box was measured in.
///
/// `origin` is where the frame's document origin sits in top-level viewport
/// coordinates, and `clip` is the part of the top-level viewport the frame
/// can actually paint into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Innermost iframe element, `None` for the top document.
    pub frame: Option<NodeId>,
    pub origin: Point,
    pub clip: Rect,
    pub viewport: Size,
}

impl FrameContext {
    pub fn top(viewport: Size) -> Self {
        Self {
            frame: None,
            origin: Point::new(0.0, 0.0),
            clip: Rect::new(0.0, 0.0, viewport.width.max(0.0), viewport.height.max(0.0)),
            viewport,
        }
    }

    pub fn is_top(&self) -> bool {
        self.frame.is_none()
    }

    /// Descend into `frame`, whose box `frame_rect` was measured in this
    /// context's document coordinates.
    pub fn enter(&self, frame: NodeId, frame_rect: Rect) -> Self {
        let on_screen = self.to_top(frame_rect);
        let clamped = clamp_frame(on_screen, self.viewport);
        Self {
            frame: Some(frame),
            origin: Point::new(on_screen.x, on_screen.y),
            clip: intersect(&self.clip, &clamped),
            viewport: self.viewport,
        }
    }

    /// Translate a box from this frame's document space to the top viewport.
    pub fn to_top(&self, local: Rect) -> Rect {
        local.translate(self.origin.x, self.origin.y)
    }

    /// Translate a top-viewport point into this frame's document space.
    pub fn to_local(&self, p: Point) -> Point {
        Point::new(p.x - self.origin.x, p.y - self.origin.y)
    }
}

/// Clamp an iframe's on-screen box against the top viewport so that a frame
/// hanging off-screen never widens the clip region.
pub fn clamp_frame(frame: Rect, viewport: Size) -> Rect {
    let x = frame.x.max(0.0);
    let y = frame.y.max(0.0);
    let width = frame
        .width
        .min(viewport.width)
        .min(viewport.width - x)
        .max(0.0);
    let height = frame
        .height
        .min(viewport.height)
        .min(viewport.height - y)
        .max(0.0);
    Rect::new(x, y, width, height)
}

pub(crate) fn intersect(a: &Rect, b: &Rect) -> Rect {
    let x = a.x.max(b.x);
    let y = a.y.max(b.y);
    let right = a.right().min(b.right());
    let bottom = a.bottom().min(b.bottom());
    Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
}

/// Clip `raw` (top-viewport coordinates) to the context's visible area and
/// round every field to the nearest pixel.
///
/// The origin is pulled inside the clip region and each extent is capped at
/// the clip extent. Rounding happens once, after clipping; the rounded
/// extent is then capped again so the box never leaves the viewport.
pub fn normalize(raw: Rect, ctx: &FrameContext) -> BoundingBox {
    let clip = ctx.clip;

    let left = raw.x.max(clip.x).min(clip.right());
    let top = raw.y.max(clip.y).min(clip.bottom());
    let width = raw.width.max(0.0).min(clip.width);
    let height = raw.height.max(0.0).min(clip.height);

    let max_x = ctx.viewport.width.max(0.0).floor() as i64;
    let max_y = ctx.viewport.height.max(0.0).floor() as i64;

    let left = (left.round() as i64).clamp(0, max_x);
    let top = (top.round() as i64).clamp(0, max_y);
    let width = (width.round() as i64).min(max_x - left).max(0);
    let height = (height.round() as i64).min(max_y - top).max(0);

    BoundingBox::new(left, top, width, height)
}
