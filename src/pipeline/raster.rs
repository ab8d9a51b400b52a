//! Coverage rasterisation into single-channel masks.
//!
//! A pixel is covered when its centre `(x + 0.5, y + 0.5)` lies inside the shape.
//! Coverage is combined with `max`, so overlapping shapes never darken each other.

use image::GrayImage;

pub type Point = (f32, f32);

pub fn fill_polygon(mask: &mut GrayImage, points: &[Point], value: u8) {
    if points.len() < 3 || points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return;
    }
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    let row_start = (min_y - 0.5).ceil().max(0.0) as u32;
    let row_end = ((max_y - 0.5).floor().min(height as f32 - 1.0)).max(-1.0) as i64;

    let mut crossings: Vec<f32> = Vec::with_capacity(points.len());
    for row in row_start as i64..=row_end {
        let yc = row as f32 + 0.5;
        crossings.clear();
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            // Half-open rule keeps shared vertices from being counted twice.
            if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                let t = (yc - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let start = (span[0] - 0.5).ceil().max(0.0);
            let end = ((span[1] - 0.5).ceil() - 1.0).min(width as f32 - 1.0);
            if end < start {
                continue;
            }
            for x in start as u32..=end as u32 {
                cover(mask, x, row as u32, value);
            }
        }
    }
}

pub fn fill_disk(mask: &mut GrayImage, center: Point, radius: f32, value: u8) {
    if radius <= 0.0 || !radius.is_finite() || !center.0.is_finite() || !center.1.is_finite() {
        return;
    }
    let (width, height) = mask.dimensions();
    let (cx, cy) = center;
    let x0 = (cx - radius - 0.5).floor().max(0.0) as i64;
    let x1 = ((cx + radius - 0.5).ceil()).min(width as f32 - 1.0) as i64;
    let y0 = (cy - radius - 0.5).floor().max(0.0) as i64;
    let y1 = ((cy + radius - 0.5).ceil()).min(height as f32 - 1.0) as i64;
    let r2 = radius * radius;

    for y in y0..=y1 {
        let dy = y as f32 + 0.5 - cy;
        for x in x0..=x1 {
            let dx = x as f32 + 0.5 - cx;
            if dx * dx + dy * dy <= r2 {
                cover(mask, x as u32, y as u32, value);
            }
        }
    }
}

/// Thick segment from `a` to `b`: a quad of the given thickness plus round end caps.
pub fn fill_capsule(mask: &mut GrayImage, a: Point, b: Point, thickness: f32, value: u8) {
    let half = thickness / 2.0;
    if half <= 0.0 {
        return;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len > f32::EPSILON {
        let (nx, ny) = (-dy / len * half, dx / len * half);
        fill_polygon(
            mask,
            &[
                (a.0 + nx, a.1 + ny),
                (b.0 + nx, b.1 + ny),
                (b.0 - nx, b.1 - ny),
                (a.0 - nx, a.1 - ny),
            ],
            value,
        );
    }
    fill_disk(mask, a, half, value);
    fill_disk(mask, b, half, value);
}

/// Axis-aligned rectangle, clipped to the mask.
pub fn fill_rect(mask: &mut GrayImage, x1: f32, y1: f32, x2: f32, y2: f32, value: u8) {
    fill_polygon(mask, &[(x1, y1), (x2, y1), (x2, y2), (x1, y2)], value);
}

pub fn covered_pixels(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v > 0).count()
}

fn cover(mask: &mut GrayImage, x: u32, y: u32, value: u8) {
    if x >= mask.width() || y >= mask.height() {
        return;
    }
    let px = mask.get_pixel_mut(x, y);
    if px.0[0] < value {
        px.0[0] = value;
    }
}
