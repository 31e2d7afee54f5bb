//! Rectangle algebra
//!
//! Axis-aligned integer rectangles with inclusive edges, as used by the
//! partial-update and overlay planner. A rectangle covering only column 0 has
//! `left == right`. Nothing here validates that a rectangle is well formed:
//! degenerate inputs (`left > right`) flow through unchanged.

use serde::{Deserialize, Serialize};

use crate::window::{PanelInfo, WinArea};

/// Inclusive rectangle in panel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle covering the whole panel
    pub fn full(panel: &PanelInfo) -> Self {
        Self::new(0, 0, far_edge(0, panel.xres), far_edge(0, panel.yres))
    }

    /// Width in pixels, counting both edges. Zero or negative when degenerate.
    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left).saturating_add(1)
    }

    /// Height in pixels, counting both edges. Zero or negative when degenerate.
    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top).saturating_add(1)
    }

    /// True unless the rectangles are disjoint on at least one axis.
    ///
    /// Edges are inclusive, so rectangles that only touch (`self.right ==
    /// other.left`) share a column and count as intersecting.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.left > other.right
            || self.right < other.left
            || self.top > other.bottom
            || self.bottom < other.top)
    }

    /// Overlapping area of both rectangles.
    ///
    /// The result is not checked for degeneracy; call [`Rect::intersects`]
    /// first when a real overlap is required.
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            top: self.top.max(other.top),
            bottom: self.bottom.min(other.bottom),
            left: self.left.max(other.left),
            right: self.right.min(other.right),
        }
    }

    /// True if any of the four coordinates differ
    pub fn differs(&self, other: &Rect) -> bool {
        self.left != other.left
            || self.top != other.top
            || self.right != other.right
            || self.bottom != other.bottom
    }

    /// True if the rectangle covers exactly `[0, xres-1] x [0, yres-1]`
    pub fn is_full_screen(&self, panel: &PanelInfo) -> bool {
        self.left == 0
            && self.top == 0
            && self.right == far_edge(0, panel.xres)
            && self.bottom == far_edge(0, panel.yres)
    }

    /// Bounding box covering both rectangles
    pub fn union_bbox(&self, other: &Rect) -> Rect {
        Rect {
            top: self.top.min(other.top),
            bottom: self.bottom.max(other.bottom),
            left: self.left.min(other.left),
            right: self.right.max(other.right),
        }
    }

    /// Bounding box whose left edge is taken from the smaller right edge.
    ///
    /// This is how older partial-update code merged regions. It is kept so the
    /// difference from [`Rect::union_bbox`] stays pinned by tests; the two
    /// only agree when the smaller right edge equals the smaller left edge.
    pub fn union_bbox_right_anchored(&self, other: &Rect) -> Rect {
        Rect {
            top: self.top.min(other.top),
            bottom: self.bottom.max(other.bottom),
            left: self.right.min(other.right),
            right: self.right.max(other.right),
        }
    }
}

/// Last pixel of a span starting at `origin`, clamped to the `i32` range
fn far_edge(origin: i32, len: u32) -> i32 {
    let edge = i64::from(origin) + i64::from(len) - 1;
    edge.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl From<&WinArea> for Rect {
    fn from(area: &WinArea) -> Self {
        Rect::new(
            area.x,
            area.y,
            far_edge(area.x, area.w),
            far_edge(area.y, area.h),
        )
    }
}
