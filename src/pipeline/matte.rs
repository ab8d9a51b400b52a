//! Luma matte extraction: brightness of a grayscale reference becomes alpha.

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use crate::error::{Result, ensure_same_dimensions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatteStatus {
    Ready,
    /// Source had no pixels; the destination was left untouched.
    NotReady,
}

/// Red when the channels agree (true grayscale), Rec.601 luma otherwise.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    if r == g && g == b {
        return r;
    }
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Writes each pixel's luma into its own alpha channel, leaving RGB as is.
pub fn apply_luma_matte(frame: &mut RgbaImage) -> MatteStatus {
    if frame.width() == 0 || frame.height() == 0 {
        return MatteStatus::NotReady;
    }
    let buffer: &mut [u8] = frame;
    buffer.par_chunks_exact_mut(4).for_each(|px| {
        px[3] = luma(px[0], px[1], px[2]);
    });
    MatteStatus::Ready
}

/// Fills `dst` with the luma matte of `src`. On a zero-area source `dst` keeps
/// its previous contents.
pub fn extract_luma_mask(src: &RgbaImage, dst: &mut GrayImage) -> Result<MatteStatus> {
    if src.width() == 0 || src.height() == 0 {
        return Ok(MatteStatus::NotReady);
    }
    ensure_same_dimensions(dst.dimensions(), src.dimensions())?;

    let out: &mut [u8] = dst;
    out.par_iter_mut()
        .zip(src.as_raw().par_chunks_exact(4))
        .for_each(|(value, px)| {
            *value = luma(px[0], px[1], px[2]);
        });
    Ok(MatteStatus::Ready)
}

/// Allocating form of [`extract_luma_mask`]; `None` when the source is empty.
pub fn luma_mask(src: &RgbaImage) -> Option<GrayImage> {
    let mut mask = GrayImage::new(src.width(), src.height());
    match extract_luma_mask(src, &mut mask) {
        Ok(MatteStatus::Ready) => Some(mask),
        _ => None,
    }
}
