use fast_image_resize as fir;
use image::{GrayImage, RgbaImage};

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Area average, used for shrinking masks.
    Box,
    Bilinear,
    /// No smoothing; keeps blocky cells blocky.
    Nearest,
}

impl Filter {
    fn options(self) -> fir::ResizeOptions {
        let alg = match self {
            Filter::Box => fir::ResizeAlg::Convolution(fir::FilterType::Box),
            Filter::Bilinear => fir::ResizeAlg::Convolution(fir::FilterType::Bilinear),
            Filter::Nearest => fir::ResizeAlg::Nearest,
        };
        fir::ResizeOptions::new().resize_alg(alg)
    }
}

pub fn resize_mask(mask: &GrayImage, width: u32, height: u32, filter: Filter) -> Result<GrayImage> {
    if mask.dimensions() == (width, height) {
        return Ok(mask.clone());
    }
    let raw = resize_raw(
        mask.as_raw().clone(),
        mask.dimensions(),
        (width, height),
        fir::PixelType::U8,
        filter,
    )?;
    GrayImage::from_raw(width, height, raw).ok_or(EngineError::BufferSize {
        expected: width as usize * height as usize,
        actual: 0,
    })
}

pub fn resize_rgba(image: &RgbaImage, width: u32, height: u32, filter: Filter) -> Result<RgbaImage> {
    if image.dimensions() == (width, height) {
        return Ok(image.clone());
    }
    let raw = resize_raw(
        image.as_raw().clone(),
        image.dimensions(),
        (width, height),
        fir::PixelType::U8x4,
        filter,
    )?;
    RgbaImage::from_raw(width, height, raw).ok_or(EngineError::BufferSize {
        expected: width as usize * height as usize * 4,
        actual: 0,
    })
}

fn resize_raw(
    data: Vec<u8>,
    (src_w, src_h): (u32, u32),
    (dst_w, dst_h): (u32, u32),
    pixel_type: fir::PixelType,
    filter: Filter,
) -> Result<Vec<u8>> {
    if src_w == 0 || src_h == 0 {
        return Err(EngineError::InvalidDimensions {
            width: src_w,
            height: src_h,
        });
    }
    if dst_w == 0 || dst_h == 0 {
        return Err(EngineError::InvalidDimensions {
            width: dst_w,
            height: dst_h,
        });
    }

    let src_image = fir::images::Image::from_vec_u8(src_w, src_h, data, pixel_type)
        .map_err(|err| EngineError::Resize(err.to_string()))?;
    let mut dst_image = fir::images::Image::new(dst_w, dst_h, pixel_type);
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, Some(&filter.options()))
        .map_err(|err| EngineError::Resize(err.to_string()))?;
    Ok(dst_image.into_vec())
}
