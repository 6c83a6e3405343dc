//! Rectangle types.
//!
//! These are used for detection boxes, regions of interest, and for sampling network inputs out of
//! camera frames.

use std::fmt;

use nalgebra::{Rotation2, Vector2};

use super::AspectRatio;

/// 2D vector type used for positions and sizes.
pub type Vec2 = Vector2<f32>;

/// Rotates `v` clockwise (in image coordinates, where Y points down) by `radians`.
#[inline]
fn rotate_cw(v: Vec2, radians: f32) -> Vec2 {
    Rotation2::new(radians) * v
}

/// An axis-aligned rectangle.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Vec2,
    size: Vec2,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Vec2::new(x_center, y_center),
            size: Vec2::new(width, height),
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_center(x + width * 0.5, y + height * 0.5, width, height)
    }

    /// Computes the axis-aligned bounding rectangle that encompasses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter().map(Vec2::from);
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), pt| (min.inf(&pt), max.sup(&pt)));

        let size = max - min;
        Some(Self::from_top_left(min.x, min.y, size.x, size.y))
    }

    /// Scales width and height by `scale`, keeping the center in place.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Grows this rectangle by adding a margin relative to width and height.
    ///
    /// `amount` is the relative amount of the rectangle's width and height to add to each side.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.scale(1.0 + 2.0 * amount)
    }

    /// Symmetrically extends one dimension of `self` so that the result has the given aspect
    /// ratio.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target: AspectRatio) -> Self {
        let mut res = *self;
        let target_width = self.height() * target.as_f32();
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / target.as_f32();
        }
        res
    }

    /// Returns a copy of `self` that has been moved to a new center position.
    #[must_use]
    pub fn with_center(&self, x_center: f32, y_center: f32) -> Self {
        Self::from_center(x_center, y_center, self.width(), self.height())
    }

    #[inline]
    pub fn top_left(&self) -> Vec2 {
        self.center - self.size * 0.5
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.top_left().x
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.top_left().y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.size
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// Returns [`None`] when the rectangles do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.top_left().sup(&other.top_left());
        let max = (self.top_left() + self.size).inf(&(other.top_left() + other.size));
        if min.x > max.x || min.y > max.y {
            return None;
        }
        Rect::bounding([min.into(), max.into()])
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection(other).map_or(0.0, |r| r.area());
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Returns the corners in order top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Vec2; 4] {
        let tl = self.top_left();
        let [w, h] = [self.width(), self.height()];
        [
            tl,
            tl + Vec2::new(w, 0.0),
            tl + Vec2::new(w, h),
            tl + Vec2::new(0.0, h),
        ]
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}

/// A [`Rect`], rotated clockwise around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    /// Creates a new rotated rectangle.
    ///
    /// `radians` is the clockwise rotation to apply to the [`Rect`].
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Computes the bounding rectangle with rotation `radians` that encompasses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(radians: f32, points: I) -> Option<Self> {
        // Rotate all points into the rectangle's frame, find the extents there, and rotate the
        // center back out.
        let rotated = points
            .into_iter()
            .map(|p| rotate_cw(Vec2::from(p), -radians).into());
        let aligned = Rect::bounding(rotated)?;
        let center = rotate_cw(aligned.center(), radians);

        Some(Self::new(
            aligned.with_center(center.x, center.y),
            radians,
        ))
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// Returns a reference to the underlying non-rotated rectangle.
    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Applies a closure to the underlying non-rotated [`Rect`].
    #[must_use]
    pub fn map(mut self, f: impl FnOnce(Rect) -> Rect) -> Self {
        self.rect = f(self.rect);
        self
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.rect.center()
    }

    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.map(|rect| rect.grow_rel(amount))
    }

    #[must_use]
    pub fn grow_to_fit_aspect(&self, target: AspectRatio) -> Self {
        self.map(|rect| rect.grow_to_fit_aspect(target))
    }

    /// Returns the rotated corners in the parent's coordinate system.
    ///
    /// The order matches [`Rect::corners`] before the rotation is applied.
    pub fn rotated_corners(&self) -> [Vec2; 4] {
        let center = self.rect.center();
        self.rect
            .corners()
            .map(|p| center + rotate_cw(p - center, self.radians))
    }

    /// Computes the IoU of the axis-aligned bounding boxes of `self` and `other`.
    pub fn iou(&self, other: &Self) -> f32 {
        let a = Rect::bounding(self.rotated_corners().map(Into::into));
        let b = Rect::bounding(other.rotated_corners().map(Into::into));
        match (a, b) {
            (Some(a), Some(b)) => a.iou(&b),
            _ => 0.0,
        }
    }

    /// Transforms a point from the parent coordinate system into the rectangle's system.
    ///
    /// The origin of the inner coordinate system is the top left corner of the rectangle.
    pub fn transform_in(&self, x: f32, y: f32) -> [f32; 2] {
        let half = self.rect.size() * 0.5;
        let rel = Vec2::new(x, y) - self.rect.center();
        (rotate_cw(rel, -self.radians) + half).into()
    }

    /// Transforms a point from the rectangle's coordinate system to the parent system.
    ///
    /// The origin of the inner coordinate system is the top left corner of the rectangle.
    pub fn transform_out(&self, x: f32, y: f32) -> [f32; 2] {
        let half = self.rect.size() * 0.5;
        let rel = Vec2::new(x, y) - half;
        (rotate_cw(rel, self.radians) + self.rect.center()).into()
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}
