//! Integer rectangles and source/destination mapping under layer transforms.
//!
//! A layer's transform is applied as a 90 degree clockwise rotation (when transposing)
//! followed by the horizontal/vertical mirrors in destination space. Every mapping in this
//! module inverts that order.

use smallvec::SmallVec;

use crate::foundation::core::{Rect, Transform};

/// Integer rectangle with exclusive right/bottom edges.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct IRect {
    /// Inclusive left edge.
    pub left: i32,
    /// Inclusive top edge.
    pub top: i32,
    /// Exclusive right edge.
    pub right: i32,
    /// Exclusive bottom edge.
    pub bottom: i32,
}

impl IRect {
    /// Create a rectangle from its edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, saturating_i32(width), saturating_i32(height))
    }

    /// Width, zero when inverted.
    pub fn width(self) -> u32 {
        span(self.left, self.right)
    }

    /// Height, zero when inverted.
    pub fn height(self) -> u32 {
        span(self.top, self.bottom)
    }

    /// Area in pixels.
    pub fn area(self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Return `true` when the rectangle covers no pixels.
    pub fn is_empty(self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Overlapping part of two rectangles, `None` when they do not overlap.
    pub fn intersect(self, other: Self) -> Option<Self> {
        let r = Self::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Return `true` when `other` lies entirely inside `self`.
    pub fn contains_rect(self, other: Self) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Return `true` when the pixel at `(x, y)` is covered.
    pub fn contains(self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Parts of `self` not covered by `other`, as at most four disjoint rectangles.
    ///
    /// Bands are emitted in a fixed order: top, bottom, left, right. The top and bottom bands
    /// span the full width of `self`; the side bands span the overlap rows only.
    pub fn subtract(self, other: Self) -> SmallVec<[Self; 4]> {
        let mut out = SmallVec::new();
        if self.is_empty() {
            return out;
        }
        let Some(inner) = self.intersect(other) else {
            out.push(self);
            return out;
        };

        if inner.top > self.top {
            out.push(Self::new(self.left, self.top, self.right, inner.top));
        }
        if inner.bottom < self.bottom {
            out.push(Self::new(self.left, inner.bottom, self.right, self.bottom));
        }
        if inner.left > self.left {
            out.push(Self::new(self.left, inner.top, inner.left, inner.bottom));
        }
        if inner.right < self.right {
            out.push(Self::new(inner.right, inner.top, self.right, inner.bottom));
        }
        out
    }

    /// Same rectangle moved so its top-left corner is at the origin.
    ///
    /// Spans wider than `i32::MAX` are clamped.
    pub fn at_origin(self) -> Self {
        Self::from_size(self.width(), self.height())
    }

    /// Float copy of this rectangle.
    pub fn to_rect(self) -> Rect {
        Rect::new(
            f64::from(self.left),
            f64::from(self.top),
            f64::from(self.right),
            f64::from(self.bottom),
        )
    }
}

fn saturating_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn span(from: i32, to: i32) -> u32 {
    u32::try_from(i64::from(to) - i64::from(from)).unwrap_or(0)
}

/// Distance from `origin` to `v` without overflowing.
fn offset(v: i32, origin: i32) -> f64 {
    f64::from(v) - f64::from(origin)
}

/// Map a normalised destination coordinate `(u, v)` in `[0, 1]` back to normalised source
/// space.
pub fn dst_to_src_normalized(transform: Transform, u: f64, v: f64) -> (f64, f64) {
    let u = if transform.is_flip_h() { 1.0 - u } else { u };
    let v = if transform.is_flip_v() { 1.0 - v } else { v };
    if transform.is_transpose() {
        (v, 1.0 - u)
    } else {
        (u, v)
    }
}

/// Source-space sample position for the centre of destination pixel `(x, y)`.
///
/// Returns `None` when the pixel lies outside `dst`.
pub fn map_dst_to_src(src: Rect, dst: IRect, transform: Transform, x: i32, y: i32) -> Option<(f64, f64)> {
    if !dst.contains(x, y) {
        return None;
    }
    let u = (offset(x, dst.left) + 0.5) / f64::from(dst.width());
    let v = (offset(y, dst.top) + 0.5) / f64::from(dst.height());
    let (s, t) = dst_to_src_normalized(transform, u, v);
    Some((src.x0 + s * src.width(), src.y0 + t * src.height()))
}

/// Clip `dst` to `dest_rect`, cropping `src` by the matching amount on the
/// transform-correct edges.
///
/// Returns `false` when nothing remains visible (degenerate input or no overlap); `src` and
/// `dst` are left untouched in that case.
pub fn clip_to_dest_rect(src: &mut Rect, transform: Transform, dst: &mut IRect, dest_rect: IRect) -> bool {
    if dst.is_empty() || dest_rect.is_empty() || src.width() == 0.0 || src.height() == 0.0 {
        return false;
    }
    let Some(clipped) = dst.intersect(dest_rect) else {
        return false;
    };
    if clipped == *dst {
        return true;
    }

    let dw = f64::from(dst.width());
    let dh = f64::from(dst.height());
    let u0 = offset(clipped.left, dst.left) / dw;
    let u1 = offset(clipped.right, dst.left) / dw;
    let v0 = offset(clipped.top, dst.top) / dh;
    let v1 = offset(clipped.bottom, dst.top) / dh;

    let (s0, t0) = dst_to_src_normalized(transform, u0, v0);
    let (s1, t1) = dst_to_src_normalized(transform, u1, v1);

    let sw = src.width();
    let sh = src.height();
    *src = Rect::new(
        src.x0 + s0.min(s1) * sw,
        src.y0 + t0.min(t1) * sh,
        src.x0 + s0.max(s1) * sw,
        src.y0 + t0.max(t1) * sh,
    );
    *dst = clipped;
    true
}

/// [`clip_to_dest_rect`] against a display of `width` x `height` at the origin.
pub fn clip_to_display(src: &mut Rect, transform: Transform, dst: &mut IRect, width: u32, height: u32) -> bool {
    clip_to_dest_rect(src, transform, dst, IRect::from_size(width, height))
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/geometry.rs"]
mod tests;
