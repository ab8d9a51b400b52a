//! Back-to-front layer composition with `over` and `cutout` blending.

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use super::raster;
use crate::{
    error::{EngineError, Result, ensure_same_dimensions},
    types::Pose,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Over,
    /// Destination alpha is multiplied by the layer's alpha.
    Cutout,
}

#[derive(Clone, Copy, Debug)]
pub enum LayerSource<'a> {
    Image(&'a RgbaImage),
    /// Single-channel coverage, treated as white with that alpha.
    Mask(&'a GrayImage),
}

impl LayerSource<'_> {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            LayerSource::Image(image) => image.dimensions(),
            LayerSource::Mask(mask) => mask.dimensions(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CompositorLayer<'a> {
    pub source: LayerSource<'a>,
    pub blend: BlendMode,
}

impl<'a> CompositorLayer<'a> {
    pub fn over(image: &'a RgbaImage) -> Self {
        Self {
            source: LayerSource::Image(image),
            blend: BlendMode::Over,
        }
    }

    pub fn cutout(mask: &'a GrayImage) -> Self {
        Self {
            source: LayerSource::Mask(mask),
            blend: BlendMode::Cutout,
        }
    }
}

/// Composes `layers` onto a transparent `width`×`height` canvas. Every layer
/// must match the canvas size; nothing is drawn if one does not.
pub fn compose(width: u32, height: u32, layers: &[CompositorLayer<'_>]) -> Result<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidDimensions { width, height });
    }
    for layer in layers {
        ensure_same_dimensions((width, height), layer.source.dimensions())?;
    }

    let mut canvas = RgbaImage::new(width, height);
    for layer in layers {
        match (layer.blend, layer.source) {
            (BlendMode::Over, LayerSource::Image(image)) => composite_over(&mut canvas, image)?,
            (BlendMode::Over, LayerSource::Mask(mask)) => over_mask(&mut canvas, mask)?,
            (BlendMode::Cutout, LayerSource::Mask(mask)) => apply_cutout(&mut canvas, mask)?,
            (BlendMode::Cutout, LayerSource::Image(image)) => {
                apply_cutout_alpha(&mut canvas, image)?
            }
        }
    }
    Ok(canvas)
}

/// Straight-alpha source-over.
pub fn composite_over(dst: &mut RgbaImage, src: &RgbaImage) -> Result<()> {
    ensure_same_dimensions(dst.dimensions(), src.dimensions())?;
    let out: &mut [u8] = dst;
    out.par_chunks_exact_mut(4)
        .zip(src.as_raw().par_chunks_exact(4))
        .for_each(|(d, s)| blend_over(d, [s[0], s[1], s[2]], s[3]));
    Ok(())
}

fn over_mask(dst: &mut RgbaImage, mask: &GrayImage) -> Result<()> {
    ensure_same_dimensions(dst.dimensions(), mask.dimensions())?;
    let out: &mut [u8] = dst;
    out.par_chunks_exact_mut(4)
        .zip(mask.as_raw().par_iter())
        .for_each(|(d, &a)| blend_over(d, [255, 255, 255], a));
    Ok(())
}

#[inline]
fn blend_over(dst: &mut [u8], rgb: [u8; 3], alpha: u8) {
    match alpha {
        0 => {}
        255 => {
            dst[..3].copy_from_slice(&rgb);
            dst[3] = 255;
        }
        _ => {
            let sa = alpha as f32 / 255.0;
            let da = dst[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            if out_a <= 0.0 {
                dst.fill(0);
                return;
            }
            for c in 0..3 {
                let sc = rgb[c] as f32;
                let dc = dst[c] as f32;
                dst[c] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round() as u8;
            }
            dst[3] = (out_a * 255.0).round() as u8;
        }
    }
}

/// Keeps the destination only where the mask is opaque.
pub fn apply_cutout(dst: &mut RgbaImage, mask: &GrayImage) -> Result<()> {
    ensure_same_dimensions(dst.dimensions(), mask.dimensions())?;
    let out: &mut [u8] = dst;
    out.par_chunks_exact_mut(4)
        .zip(mask.as_raw().par_iter())
        .for_each(|(d, &m)| d[3] = mul_alpha(d[3], m));
    Ok(())
}

fn apply_cutout_alpha(dst: &mut RgbaImage, src: &RgbaImage) -> Result<()> {
    ensure_same_dimensions(dst.dimensions(), src.dimensions())?;
    let out: &mut [u8] = dst;
    out.par_chunks_exact_mut(4)
        .zip(src.as_raw().par_chunks_exact(4))
        .for_each(|(d, s)| d[3] = mul_alpha(d[3], s[3]));
    Ok(())
}

#[inline]
fn mul_alpha(a: u8, b: u8) -> u8 {
    ((a as u32 * b as u32 + 127) / 255) as u8
}

/// Padded rectangle around each pose's confident keypoints.
pub fn bounding_box_mask(
    width: u32,
    height: u32,
    poses: &[Pose],
    threshold: f32,
    padding: f32,
) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for pose in poses {
        if let Some([x1, y1, x2, y2]) = pose_bounds(pose, threshold) {
            raster::fill_rect(
                &mut mask,
                x1 - padding,
                y1 - padding,
                x2 + padding,
                y2 + padding,
                255,
            );
        }
    }
    mask
}

pub fn pose_bounds(pose: &Pose, threshold: f32) -> Option<[f32; 4]> {
    let mut bounds: Option<[f32; 4]> = None;
    for kp in pose.keypoints.iter().filter(|kp| kp.is_confident(threshold)) {
        let b = bounds.get_or_insert([kp.x, kp.y, kp.x, kp.y]);
        b[0] = b[0].min(kp.x);
        b[1] = b[1].min(kp.y);
        b[2] = b[2].max(kp.x);
        b[3] = b[3].max(kp.y);
    }
    bounds
}

/// Colour of `src` blended over a solid background; alpha keeps the matte.
pub fn flatten_onto(src: &RgbaImage, background: [u8; 3]) -> RgbaImage {
    let mut out = src.clone();
    let buffer: &mut [u8] = &mut out;
    buffer.par_chunks_exact_mut(4).for_each(|px| {
        let a = px[3] as f32 / 255.0;
        for c in 0..3 {
            let v = px[c] as f32 * a + background[c] as f32 * (1.0 - a);
            px[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Keypoint, KeypointIndex};
    use image::{Luma, Rgba};

    fn half_mask(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| if x < width / 2 { Luma([255]) } else { Luma([0]) })
    }

    #[test]
    fn test_over_opaque_replaces() {
        let base = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let top = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 255]));
        let out = compose(2, 2, &[CompositorLayer::over(&base), CompositorLayer::over(&top)]).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [200, 100, 50, 255]);
    }

    #[test]
    fn test_over_transparent_keeps_destination() {
        let base = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let top = RgbaImage::new(2, 2);
        let out = compose(2, 2, &[CompositorLayer::over(&base), CompositorLayer::over(&top)]).unwrap();
        assert_eq!(out.get_pixel(1, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_over_half_alpha_blends() {
        let mut dst = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let src = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 128]));
        composite_over(&mut dst, &src).unwrap();
        let px = dst.get_pixel(0, 0).0;
        assert_eq!(px[3], 255);
        assert!((px[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_cutout_keeps_only_masked() {
        let base = RgbaImage::from_pixel(4, 2, Rgba([9, 9, 9, 255]));
        let mask = half_mask(4, 2);
        let out = compose(4, 2, &[CompositorLayer::over(&base), CompositorLayer::cutout(&mask)]).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(out.get_pixel(3, 1).0[3], 0);
    }

    #[test]
    fn test_cutout_is_idempotent() {
        let base = RgbaImage::from_fn(6, 3, |x, y| Rgba([x as u8 * 40, y as u8 * 80, 7, 200]));
        let mask = half_mask(6, 3);
        let mut once = base.clone();
        apply_cutout(&mut once, &mask).unwrap();
        let mut twice = once.clone();
        apply_cutout(&mut twice, &mask).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_overlay_after_cutout_survives() {
        let base = RgbaImage::from_pixel(4, 1, Rgba([1, 1, 1, 255]));
        let mask = GrayImage::new(4, 1);
        let overlay = RgbaImage::from_pixel(4, 1, Rgba([0, 255, 0, 255]));
        let out = compose(
            4,
            1,
            &[
                CompositorLayer::over(&base),
                CompositorLayer::cutout(&mask),
                CompositorLayer::over(&overlay),
            ],
        )
        .unwrap();
        assert_eq!(out.get_pixel(2, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_mismatched_layer_is_rejected() {
        let base = RgbaImage::new(4, 4);
        let mask = GrayImage::new(3, 4);
        let err = compose(4, 4, &[CompositorLayer::over(&base), CompositorLayer::cutout(&mask)]);
        assert_eq!(
            err.unwrap_err(),
            EngineError::DimensionMismatch {
                expected: (4, 4),
                actual: (3, 4)
            }
        );
        assert!(matches!(
            compose(0, 4, &[]),
            Err(EngineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_bounding_box_mask_pads_confident_points() {
        let mut pose = Pose::default();
        pose.keypoints[0] = Keypoint::new(KeypointIndex::Nose, 40.0, 30.0, 0.9);
        pose.keypoints[15] = Keypoint::new(KeypointIndex::LeftAnkle, 60.0, 70.0, 0.9);
        // low-confidence outlier must not stretch the box
        pose.keypoints[9] = Keypoint::new(KeypointIndex::LeftWrist, 2.0, 2.0, 0.1);

        let mask = bounding_box_mask(100, 100, &[pose], 0.3, 20.0);
        assert_eq!(mask.get_pixel(20, 10).0[0], 255);
        assert_eq!(mask.get_pixel(79, 89).0[0], 255);
        assert_eq!(mask.get_pixel(80, 90).0[0], 0);
        assert_eq!(mask.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn test_bounding_box_mask_empty_without_confident_points() {
        let mask = bounding_box_mask(10, 10, &[Pose::default()], 0.3, 20.0);
        assert!(mask.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_flatten_onto_white() {
        let mut src = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let out = flatten_onto(&src, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [255, 255, 255, 0]);
    }
}
