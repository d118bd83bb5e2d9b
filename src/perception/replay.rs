use std::path::Path;

use async_trait::async_trait;
use image::RgbImage;

use crate::errors::{ColorBotError, ColorBotResult};
use crate::geometry::Point;
use crate::perception::traits::FrameSource;
use crate::perception::types::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "bmp", "jpg", "jpeg"];

/// Plays back recorded screenshots as if they were live captures. Every
/// capture yields a new frame id even when the same image repeats.
pub struct ReplaySource {
    images: Vec<RgbImage>,
    next: usize,
    looping: bool,
    origin: Point,
    scale: f64,
    label: String,
}

impl ReplaySource {
    pub fn from_images(images: Vec<RgbImage>) -> ColorBotResult<Self> {
        if images.is_empty() {
            return Err(ColorBotError::Config("replay needs at least one image".into()));
        }
        Ok(Self {
            images,
            next: 0,
            looping: true,
            origin: Point::default(),
            scale: 1.0,
            label: "in-memory replay".into(),
        })
    }

    /// Load every image in `dir`, in file name order.
    pub fn from_dir(dir: impl AsRef<Path>) -> ColorBotResult<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in &paths {
            images.push(image::open(path)?.to_rgb8());
        }
        tracing::info!(dir = %dir.display(), frames = images.len(), "replay frames loaded");

        let mut source = Self::from_images(images).map_err(|_| {
            ColorBotError::Config(format!("no replay images in {}", dir.display()))
        })?;
        source.label = format!("replay:{}", dir.display());
        Ok(source)
    }

    /// Stop with a capture error after the last image instead of wrapping around.
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    /// Where the recorded window sat on screen.
    pub fn with_placement(mut self, origin: Point, scale: f64) -> Self {
        self.origin = origin;
        self.scale = scale;
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn capture(&mut self) -> ColorBotResult<Frame> {
        if self.next >= self.images.len() {
            if !self.looping {
                return Err(ColorBotError::Capture("replay finished".into()));
            }
            self.next = 0;
        }
        let image = self.images[self.next].clone();
        self.next += 1;
        Frame::from_rgb_image(image).with_placement(self.origin, self.scale)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
