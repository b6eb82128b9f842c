//! Rendered run artifacts: class overlays, mask cutouts and the trend chart.

use concord_core::{Mask, TrendSummary};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

/// Reference-only pixels.
const USER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Candidate-only pixels.
const MODEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Pixels claimed by both sides.
const BOTH_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const OVERLAY_ALPHA: f32 = 0.4;

const CHART_WIDTH: u32 = 640;
const CHART_HEIGHT: u32 = 360;
const CHART_MARGIN_LEFT: u32 = 36;
const CHART_MARGIN_RIGHT: u32 = 16;
const CHART_MARGIN_TOP: u32 = 16;
const CHART_MARGIN_BOTTOM: u32 = 28;

const AUTO_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
const INSTANCE_COLOR: Rgb<u8> = Rgb([255, 127, 14]);
const AGREEMENT_COLOR: Rgb<u8> = Rgb([44, 160, 44]);

/// Alpha-blended disagreement overlay.
///
/// Red marks pixels only the user claimed, green pixels only the model
/// claimed, yellow pixels both agree on. A small swatch legend sits in the
/// lower-right corner (red, green, yellow, top to bottom).
pub fn render_overlay(image: &RgbImage, reference: &Mask, candidates: &Mask) -> RgbImage {
    let (width, height) = image.dimensions();
    let reference = at_dimensions(reference, width, height);
    let candidates = at_dimensions(candidates, width, height);

    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let user = reference.get(x, y);
        let model = candidates.get(x, y);
        let color = match (user, model) {
            (true, true) => BOTH_COLOR,
            (true, false) => USER_COLOR,
            (false, true) => MODEL_COLOR,
            (false, false) => continue,
        };
        *pixel = blend(*pixel, color, OVERLAY_ALPHA);
    }

    draw_legend(&mut out, &[USER_COLOR, MODEL_COLOR, BOTH_COLOR]);
    out
}

/// Source pixels where the mask is set, black elsewhere.
pub fn render_cutout(image: &RgbImage, mask: &Mask) -> RgbImage {
    let (width, height) = image.dimensions();
    let mask = at_dimensions(mask, width, height);
    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get(x, y) {
            *pixel = *image.get_pixel(x, y);
        }
    }
    out
}

/// Mean-IoU-per-run line chart with a fixed `[0, 1]` y axis.
///
/// One polyline with circular markers per metric: automatic generator blue,
/// instance model orange, cross-model agreement green. Renders the empty
/// axes frame when there are no runs yet.
pub fn render_trend(trend: &TrendSummary) -> RgbImage {
    let mut out = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, Rgb([255, 255, 255]));

    let left = CHART_MARGIN_LEFT as f32;
    let right = (CHART_WIDTH - CHART_MARGIN_RIGHT - 1) as f32;
    let top = CHART_MARGIN_TOP as f32;
    let bottom = (CHART_HEIGHT - CHART_MARGIN_BOTTOM - 1) as f32;

    // Frame and horizontal gridlines at 0.25 steps.
    let frame = Rgb([0, 0, 0]);
    let grid = Rgb([220, 220, 220]);
    for fraction in [0.25f32, 0.5, 0.75] {
        let y = bottom - fraction * (bottom - top);
        draw_line_segment_mut(&mut out, (left, y), (right, y), grid);
    }
    draw_line_segment_mut(&mut out, (left, top), (right, top), frame);
    draw_line_segment_mut(&mut out, (left, bottom), (right, bottom), frame);
    draw_line_segment_mut(&mut out, (left, top), (left, bottom), frame);
    draw_line_segment_mut(&mut out, (right, top), (right, bottom), frame);

    draw_series(&mut out, &trend.auto_series, AUTO_COLOR, left, right, top, bottom);
    draw_series(
        &mut out,
        &trend.instance_series,
        INSTANCE_COLOR,
        left,
        right,
        top,
        bottom,
    );
    draw_series(
        &mut out,
        &trend.agreement_series,
        AGREEMENT_COLOR,
        left,
        right,
        top,
        bottom,
    );

    // Legend swatches inside the top-right of the plot area.
    let swatch = 10i32;
    let swatch_x = (right - 18.0) as i32;
    for (row, color) in [AUTO_COLOR, INSTANCE_COLOR, AGREEMENT_COLOR].iter().enumerate() {
        let swatch_y = top as i32 + 6 + row as i32 * (swatch + 4);
        draw_filled_rect_mut(
            &mut out,
            Rect::at(swatch_x, swatch_y).of_size(swatch as u32, swatch as u32),
            *color,
        );
    }

    out
}

fn draw_series(
    canvas: &mut RgbImage,
    series: &[f32],
    color: Rgb<u8>,
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
) {
    if series.is_empty() {
        return;
    }

    let coords: Vec<(f32, f32)> = series
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let x = if series.len() == 1 {
                (left + right) / 2.0
            } else {
                left + index as f32 * (right - left) / (series.len() - 1) as f32
            };
            let y = bottom - value.clamp(0.0, 1.0) * (bottom - top);
            (x, y)
        })
        .collect();

    for pair in coords.windows(2) {
        draw_line_segment_mut(canvas, pair[0], pair[1], color);
    }
    for (x, y) in &coords {
        draw_filled_circle_mut(canvas, (*x as i32, *y as i32), 3, color);
    }
}

fn draw_legend(canvas: &mut RgbImage, colors: &[Rgb<u8>]) {
    let (width, height) = canvas.dimensions();
    let swatch = 12u32;
    let gap = 4u32;
    let block_height = colors.len() as u32 * (swatch + gap);
    if width < swatch + 2 * gap || height < block_height + gap {
        return;
    }

    let x = (width - swatch - gap) as i32;
    let mut y = (height - block_height) as i32;
    for color in colors {
        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(swatch, swatch), *color);
        y += (swatch + gap) as i32;
    }
}

fn at_dimensions(mask: &Mask, width: u32, height: u32) -> Mask {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        mask.resample_nearest(width, height)
    }
}

fn blend(base: Rgb<u8>, tint: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for c in 0..3 {
        let value = base.0[c] as f32 * (1.0 - alpha) + tint.0[c] as f32 * alpha;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
