//! Rectangle and point primitives shared by perception and humanization.
//!
//! Coordinates are pixels with the origin at the top-left. A rectangle with
//! zero width or height is degenerate and stands for "not found".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x as i64 - other.x as i64) as f64;
        let dy = (self.y as i64 - other.y as i64) as f64;
        dx.hypot(dy)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Point {
        Point::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }

    /// Map a point from a capture with `scale` frame pixels per screen pixel,
    /// whose top-left sits at `origin` on screen.
    pub fn to_screen(&self, origin: Point, scale: f64) -> Point {
        Point::new(
            origin.x.saturating_add((self.x as f64 / scale).round() as i32),
            origin.y.saturating_add((self.y as f64 / scale).round() as i32),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rectangle spanning two corner points (inclusive of the smaller, exclusive of the larger).
    pub fn from_points(a: Point, b: Point) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Self::new(left, top, a.x.abs_diff(b.x), a.y.abs_diff(b.y))
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn center(&self) -> Point {
        Point::new(
            clamp_i32(self.left as i64 + (self.width / 2) as i64),
            clamp_i32(self.top as i64 + (self.height / 2) as i64),
        )
    }

    /// `other ⊆ self`. Holds for degenerate rectangles whose corner lies in
    /// the closed extent of `self`.
    pub fn contains(&self, other: &Rectangle) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.left
            && p.y >= self.top
            && (p.x as i64) < self.right()
            && (p.y as i64) < self.bottom()
    }

    /// Positive-area overlap of two rectangles, `None` when they only touch or are disjoint.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left as i64 || bottom <= top as i64 {
            return None;
        }
        Some(Rectangle::new(
            left,
            top,
            (right - left as i64) as u32,
            (bottom - top as i64) as u32,
        ))
    }

    /// Intersection over union; 0.0 when either rectangle is degenerate.
    pub fn iou(&self, other: &Rectangle) -> f64 {
        let inter = match self.intersection(other) {
            Some(r) => r.area() as f64,
            None => return 0.0,
        };
        let union = self.area() as f64 + other.area() as f64 - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Multiply every component, rounding to the nearest pixel.
    pub fn scaled(&self, sx: f64, sy: f64) -> Rectangle {
        Rectangle::new(
            (self.left as f64 * sx).round() as i32,
            (self.top as f64 * sy).round() as i32,
            (self.width as f64 * sx).round().max(0.0) as u32,
            (self.height as f64 * sy).round().max(0.0) as u32,
        )
    }

    /// Recover true-screen coordinates from a capture taken at `scale`
    /// frame pixels per screen pixel with its top-left at `origin`.
    pub fn to_screen(&self, origin: Point, scale: f64) -> Rectangle {
        let inv = 1.0 / scale;
        self.scaled(inv, inv).translate(origin.x, origin.y)
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{} {}x{}]",
            self.left, self.top, self.width, self.height
        )
    }
}
