//! User stroke rasterization.
//!
//! Strokes arrive as free-form point lists drawn over the image. Each one is
//! filled as a closed polygon, then a fixed dilate + close pass bridges the
//! small gaps hand drawing leaves, and connected-component labeling splits
//! the result into reference regions. Strokes that touch after morphology
//! intentionally merge into a single region.

use concord_core::{Mask, Region};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::morphology::{close, dilate};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};
use tracing::debug;

const FOREGROUND: Luma<u8> = Luma([255u8]);
const BACKGROUND: Luma<u8> = Luma([0u8]);

/// One vertex of a user stroke, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
}

/// A free-form stroke drawn by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<StrokePoint>,
}

/// Rasterizes user strokes into labeled reference regions.
///
/// Vertices are truncated to integer pixel coordinates and clamped to the
/// canvas. The filled canvas is dilated with a 3x3 element (one iteration),
/// closed with a 5x5 element, re-binarized and labeled with 8-connectivity.
/// Regions come back in ascending label order, each as a mask at full image
/// dimensions. An empty stroke list yields an empty region list.
pub fn rasterize_strokes(strokes: &[Stroke], width: u32, height: u32) -> Vec<Region> {
    if strokes.is_empty() || width == 0 || height == 0 {
        return Vec::new();
    }

    let mut canvas = GrayImage::new(width, height);
    for stroke in strokes {
        fill_stroke(&mut canvas, stroke, width, height);
    }

    // 3x3 dilation then 5x5 closing, both under the chessboard norm.
    let dilated = dilate(&canvas, Norm::LInf, 1);
    let closed = close(&dilated, Norm::LInf, 2);

    let labels = connected_components(&closed, Connectivity::Eight, BACKGROUND);
    let regions = split_labels(&labels, width, height);
    debug!(
        strokes = strokes.len(),
        regions = regions.len(),
        "rasterized user strokes"
    );
    regions
}

/// Draws one stroke onto the canvas as a filled closed polygon.
///
/// Degenerate strokes still leave ink: a single point fills one pixel and a
/// two-point stroke fills a line segment, so the morphology pass can grow
/// them into small regions instead of dropping the user's mark.
fn fill_stroke(canvas: &mut GrayImage, stroke: &Stroke, width: u32, height: u32) {
    let mut vertices: Vec<Point<i32>> = Vec::with_capacity(stroke.points.len());
    for point in &stroke.points {
        let x = (point.x.trunc() as i64).clamp(0, width as i64 - 1) as i32;
        let y = (point.y.trunc() as i64).clamp(0, height as i64 - 1) as i32;
        let vertex = Point::new(x, y);
        if vertices.last() != Some(&vertex) {
            vertices.push(vertex);
        }
    }
    // The polygon fill requires an open vertex list.
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    match vertices.len() {
        0 => {}
        1 => {
            canvas.put_pixel(vertices[0].x as u32, vertices[0].y as u32, FOREGROUND);
        }
        2 => {
            draw_line_segment_mut(
                canvas,
                (vertices[0].x as f32, vertices[0].y as f32),
                (vertices[1].x as f32, vertices[1].y as f32),
                FOREGROUND,
            );
        }
        _ => {
            draw_polygon_mut(canvas, &vertices, FOREGROUND);
        }
    }
}

/// Splits a label image into per-component masks, ascending label order.
fn split_labels(
    labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    width: u32,
    height: u32,
) -> Vec<Region> {
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    if max_label == 0 {
        return Vec::new();
    }

    let mut buffers: Vec<Vec<bool>> =
        vec![vec![false; width as usize * height as usize]; max_label as usize];
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0];
        if label > 0 {
            buffers[label as usize - 1][y as usize * width as usize + x as usize] = true;
        }
    }

    buffers
        .into_iter()
        .enumerate()
        .filter_map(|(index, data)| {
            Mask::new(width, height, data)
                .ok()
                .map(|mask| Region::new(index as u32 + 1, mask))
        })
        .collect()
}
