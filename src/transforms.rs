//! Per-sample image transforms, composable into an ordered pipeline
//!
//! Order matters: geometric transforms (crop, flip) must come before
//! normalization, and occlusion (cutout) last.

use rand::{Rng, RngCore};

use crate::datasets::Image;

/// A stateless per-sample transform. Randomness comes from the caller's RNG;
/// production pipelines draw from the process-wide thread RNG.
pub trait Transform {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image;
}

/// An ordered sequence of transforms applied per sample
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Appends a transform to the end of the pipeline
    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn apply(&self, image: Image) -> Image {
        self.apply_with_rng(image, &mut rand::rng())
    }

    pub fn apply_with_rng(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        self.transforms
            .iter()
            .fold(image, |image, transform| transform.apply(image, rng))
    }
}

/// Pads the image with zeros and crops a square of `size` at a uniformly
/// random offset
pub struct RandomCrop {
    size: usize,
    padding: usize,
}

impl RandomCrop {
    pub fn new(size: usize, padding: usize) -> Self {
        Self { size, padding }
    }
}

impl Transform for RandomCrop {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        let padded_h = image.height + 2 * self.padding;
        let padded_w = image.width + 2 * self.padding;
        assert!(
            self.size <= padded_h && self.size <= padded_w,
            "crop of {} exceeds padded {}x{} image",
            self.size,
            padded_h,
            padded_w
        );
        let top = rng.random_range(0..=padded_h - self.size);
        let left = rng.random_range(0..=padded_w - self.size);

        let mut out = Image::zeros(image.channels, self.size, self.size);
        for c in 0..image.channels {
            for y in 0..self.size {
                let Some(src_y) = (top + y).checked_sub(self.padding) else {
                    continue;
                };
                if src_y >= image.height {
                    continue;
                }
                for x in 0..self.size {
                    let Some(src_x) = (left + x).checked_sub(self.padding) else {
                        continue;
                    };
                    if src_x >= image.width {
                        continue;
                    }
                    out.set(c, y, x, image.get(c, src_y, src_x));
                }
            }
        }
        out
    }
}

/// Mirrors the image left-to-right with probability `p`
pub struct RandomHorizontalFlip {
    p: f32,
}

impl RandomHorizontalFlip {
    pub fn new() -> Self {
        Self { p: 0.5 }
    }

    pub fn with_probability(p: f32) -> Self {
        Self { p }
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        if rng.random::<f32>() >= self.p {
            return image;
        }
        let mut out = image.clone();
        for c in 0..image.channels {
            for y in 0..image.height {
                for x in 0..image.width {
                    out.set(c, y, x, image.get(c, y, image.width - 1 - x));
                }
            }
        }
        out
    }
}

/// Per-channel affine normalization: `(pixel - mean[c]) / std[c]`
pub struct Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Normalize {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Self {
        assert_eq!(mean.len(), std.len());
        Self { mean, std }
    }
}

impl Transform for Normalize {
    fn apply(&self, image: Image, _rng: &mut dyn RngCore) -> Image {
        assert_eq!(image.channels, self.mean.len());
        let mut out = image;
        for c in 0..out.channels {
            for y in 0..out.height {
                for x in 0..out.width {
                    let v = (out.get(c, y, x) - self.mean[c]) / self.std[c];
                    out.set(c, y, x, v);
                }
            }
        }
        out
    }
}

/// Zeroes out `n_holes` square regions of side `length`, each centered at a
/// uniformly random pixel and clipped at the image boundary. Applied after
/// normalization.
pub struct Cutout {
    n_holes: usize,
    length: usize,
}

impl Cutout {
    pub fn new(n_holes: usize, length: usize) -> Self {
        Self { n_holes, length }
    }
}

impl Transform for Cutout {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        let mut out = image;
        for _ in 0..self.n_holes {
            let cy = rng.random_range(0..out.height);
            let cx = rng.random_range(0..out.width);
            let y1 = cy.saturating_sub(self.length / 2);
            let y2 = (cy + self.length / 2).min(out.height);
            let x1 = cx.saturating_sub(self.length / 2);
            let x2 = (cx + self.length / 2).min(out.width);
            for c in 0..out.channels {
                for y in y1..y2 {
                    for x in x1..x2 {
                        out.set(c, y, x, 0.0);
                    }
                }
            }
        }
        out
    }
}
