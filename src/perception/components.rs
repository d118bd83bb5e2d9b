//! Binary match masks and 8-connected component labelling.

use std::collections::VecDeque;

use crate::geometry::Rectangle;
use crate::perception::color::ColorSignature;
use crate::perception::types::Frame;

/// Per-pixel signature matches over a search rectangle, in frame coordinates.
#[derive(Debug, Clone)]
pub struct MatchMask {
    area: Rectangle,
    bits: Vec<bool>,
}

impl MatchMask {
    /// `area` must already be validated against the frame.
    pub fn from_frame(frame: &Frame, area: Rectangle, signature: &ColorSignature) -> Self {
        let mut bits = Vec::with_capacity(area.area() as usize);
        for y in 0..area.height {
            let fy = area.top as u32 + y;
            for x in 0..area.width {
                bits.push(signature.matches(frame.pixel(area.left as u32 + x, fy)));
            }
        }
        Self { area, bits }
    }

    pub fn area(&self) -> Rectangle {
        self.area
    }

    /// Mask-local lookup.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.area.width + x) as usize]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Matched pixels inside `rect` (frame coordinates, clipped to the mask).
    pub fn count_in(&self, rect: &Rectangle) -> usize {
        let Some(clip) = self.area.intersection(rect) else {
            return 0;
        };
        let ox = (clip.left - self.area.left) as u32;
        let oy = (clip.top - self.area.top) as u32;
        let mut n = 0;
        for y in oy..oy + clip.height {
            for x in ox..ox + clip.width {
                n += self.get(x, y) as usize;
            }
        }
        n
    }
}

/// One connected region of matching pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    /// Frame coordinates.
    pub bounds: Rectangle,
    pub pixels: usize,
}

impl Component {
    /// Fraction of the bounding box covered by the component.
    pub fn fill_ratio(&self) -> f64 {
        let area = self.bounds.area();
        if area == 0 {
            0.0
        } else {
            self.pixels as f64 / area as f64
        }
    }

    /// Union of two components' bounds and pixel counts.
    pub fn merge(&self, other: &Component) -> Component {
        let left = self.bounds.left.min(other.bounds.left);
        let top = self.bounds.top.min(other.bounds.top);
        let right = self.bounds.right().max(other.bounds.right());
        let bottom = self.bounds.bottom().max(other.bounds.bottom());
        Component {
            bounds: Rectangle::new(
                left,
                top,
                (right - left as i64) as u32,
                (bottom - top as i64) as u32,
            ),
            pixels: self.pixels + other.pixels,
        }
    }
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Flood-fill every 8-connected region of the mask, dropping regions smaller
/// than `min_pixels`. Output follows raster order of each region's first pixel.
pub fn connected_components(mask: &MatchMask, min_pixels: usize) -> Vec<Component> {
    let w = mask.area.width as i32;
    let h = mask.area.height as i32;
    let mut visited = vec![false; mask.bits.len()];
    let mut queue = VecDeque::new();
    let mut found = Vec::new();

    for start in 0..mask.bits.len() {
        if visited[start] || !mask.bits[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);

        let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
        let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
        let mut pixels = 0usize;

        while let Some(idx) = queue.pop_front() {
            let x = (idx as i32) % w;
            let y = (idx as i32) / w;
            pixels += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for (dx, dy) in NEIGHBOURS {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let n = (ny * w + nx) as usize;
                if !visited[n] && mask.bits[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if pixels < min_pixels {
            continue;
        }
        found.push(Component {
            bounds: Rectangle::new(
                mask.area.left + min_x,
                mask.area.top + min_y,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            pixels,
        });
    }

    tracing::trace!(
        area = %mask.area,
        components = found.len(),
        min_pixels,
        "connected components labelled"
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::color::Rgb;
    use crate::perception::types::PixelLayout;

    fn frame_from_art(rows: &[&str]) -> Frame {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        let mut buf = Vec::new();
        for row in rows {
            for c in row.chars() {
                let v = if c == '#' { 255 } else { 0 };
                buf.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(buf, w, h, PixelLayout::Rgb8, chrono::Utc::now()).unwrap()
    }

    #[test]
    fn diagonal_pixels_join_and_noise_drops() {
        let frame = frame_from_art(&[
            "#.....", //
            ".#...#", //
            "..#...", //
            "......", //
        ]);
        let sig = ColorSignature::exact(Rgb::WHITE);
        let mask = MatchMask::from_frame(&frame, frame.bounds(), &sig);
        assert_eq!(mask.count(), 4);

        let comps = connected_components(&mask, 2);
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].bounds, Rectangle::new(0, 0, 3, 3));
        assert_eq!(comps[0].pixels, 3);
        assert!((comps[0].fill_ratio() - 3.0 / 9.0).abs() < 1e-9);

        assert_eq!(connected_components(&mask, 1).len(), 2);
    }

    #[test]
    fn components_are_reported_in_frame_coordinates() {
        let frame = frame_from_art(&[
            "......", //
            "...##.", //
            "...##.", //
        ]);
        let sig = ColorSignature::exact(Rgb::WHITE);
        let area = Rectangle::new(2, 1, 4, 2);
        let mask = MatchMask::from_frame(&frame, area, &sig);
        let comps = connected_components(&mask, 1);
        assert_eq!(comps, vec![Component { bounds: Rectangle::new(3, 1, 2, 2), pixels: 4 }]);
        assert_eq!(mask.count_in(&Rectangle::new(0, 0, 4, 3)), 2);
    }
}
