//! Binary raster masks and labeled regions.
//!
//! Masks are stored flattened in row-major order. All comparisons in the
//! matching layer happen at the reference resolution, so the only geometry
//! operation a mask needs is nearest-neighbor resampling.

use crate::error::{Error, Result};

/// Binary segmentation mask, flattened row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// Creates a mask from row-major pixel data.
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::Mask(format!(
                "data length {} does not match {}x{} ({} pixels)",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Creates an all-false mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Builds a mask by evaluating a predicate at every pixel.
    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Mask value at (x, y). Out-of-bounds reads are false.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Sets the value at (x, y). Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = value;
        }
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// Number of true pixels.
    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&p| p).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&p| p)
    }

    /// In-place logical OR with a mask of the same dimensions.
    pub fn union_with(&mut self, other: &Mask) -> Result<()> {
        self.check_dimensions(other)?;
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst = *dst || *src;
        }
        Ok(())
    }

    /// Count of pixels set in both masks.
    pub fn intersection_area(&self, other: &Mask) -> Result<usize> {
        self.check_dimensions(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .filter(|&(&a, &b)| a && b)
            .count())
    }

    /// Count of pixels set in either mask.
    pub fn union_area(&self, other: &Mask) -> Result<usize> {
        self.check_dimensions(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .filter(|&(&a, &b)| a || b)
            .count())
    }

    /// Nearest-neighbor resample to the target dimensions.
    ///
    /// Source coordinates are derived with integer arithmetic
    /// (`src = dst * src_extent / dst_extent`), so repeated resampling is
    /// deterministic and an exact integer upscale survives the round trip.
    pub fn resample_nearest(&self, width: u32, height: u32) -> Mask {
        if width == self.width && height == self.height {
            return self.clone();
        }
        if width == 0 || height == 0 || self.width == 0 || self.height == 0 {
            return Mask::empty(width, height);
        }
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let src_y = ((y as u64 * self.height as u64) / height as u64) as u32;
            let row = src_y as usize * self.width as usize;
            for x in 0..width {
                let src_x = ((x as u64 * self.width as u64) / width as u64) as usize;
                data.push(self.data[row + src_x]);
            }
        }
        Mask {
            width,
            height,
            data,
        }
    }

    /// Tight bounding box over true pixels as (x, y, width, height).
    pub fn bounding_box(&self) -> Option<(u32, u32, u32, u32)> {
        let mut min_x = self.width;
        let mut max_x = 0;
        let mut min_y = self.height;
        let mut max_y = 0;
        let mut found = false;

        for y in 0..self.height {
            for x in 0..self.width {
                if self.data[y as usize * self.width as usize + x as usize] {
                    found = true;
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                    min_y = min_y.min(y);
                    max_y = max_y.max(y);
                }
            }
        }

        if found {
            Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
        } else {
            None
        }
    }

    fn check_dimensions(&self, other: &Mask) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(Error::Mask(format!(
                "dimension mismatch: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(())
    }
}

/// One labeled region: a mask at full image dimensions plus its pixel area.
///
/// For user regions the label is the 1-based connected-component label; for
/// model proposals it is the proposal's position in the candidate list.
#[derive(Debug, Clone)]
pub struct Region {
    pub label: u32,
    pub mask: Mask,
    pub area: usize,
}

impl Region {
    pub fn new(label: u32, mask: Mask) -> Self {
        let area = mask.area();
        Self { label, mask, area }
    }
}
