//! Live camera input through nokhwa, decoded to RGBA on a capture thread.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use super::{slot::LatestSlot, source::FrameSource};
use crate::types::Frame;

// Uncompressed formats first; some built-in cameras reject YUYV even when
// it is advertised.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: u32,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(cameras
        .into_iter()
        .filter_map(|info| {
            let index = info.index().as_index().ok()?;
            Some(CameraDevice {
                index,
                label: info.human_name(),
            })
        })
        .collect())
}

fn open_camera(index: u32) -> Result<Camera> {
    let mut last_err = None;
    for requested in requested_formats() {
        match Camera::new(CameraIndex::Index(index), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("camera {index} accepts none of the requested formats")))
}

fn pack_dimensions(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

fn unpack_dimensions(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// A [`FrameSource`] fed by a background capture loop. Not ready until the
/// first frame has been decoded; afterwards each pull returns the newest
/// frame, or repeats the previous one when the camera has not delivered yet.
pub struct CameraFrameSource {
    frames: LatestSlot<Frame>,
    dimensions: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    last: Option<Frame>,
}

impl CameraFrameSource {
    pub fn open(index: u32) -> Result<Self> {
        // Fail fast before spawning the capture thread.
        drop(open_camera(index)?);

        let frames = LatestSlot::new();
        let dimensions = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let frames = frames.clone();
            let dimensions = dimensions.clone();
            let stop = stop.clone();
            thread::spawn(move || capture_loop(index, frames, dimensions, stop))
        };
        log::info!("camera {index} streaming");

        Ok(Self {
            frames,
            dimensions,
            stop,
            handle: Some(handle),
            last: None,
        })
    }

    fn is_capturing(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

fn capture_loop(
    index: u32,
    frames: LatestSlot<Frame>,
    dimensions: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) {
    let mut camera = match open_camera(index) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to open camera {index}: {err:?}");
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("camera frame read failed: {err:?}");
                continue;
            }
        };
        let image = match decode_buffer(&buffer) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("failed to decode camera frame: {err:?}");
                continue;
            }
        };
        dimensions.store(
            pack_dimensions(image.width(), image.height()),
            Ordering::Release,
        );
        frames.publish(Frame::from_image(image));
    }

    if let Err(err) = camera.stop_stream() {
        log::warn!("failed to stop camera stream: {err:?}");
    }
}

impl FrameSource for CameraFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        unpack_dimensions(self.dimensions.load(Ordering::Acquire))
    }

    fn is_ready(&self) -> bool {
        let (width, height) = self.dimensions();
        width > 0 && height > 0 && self.is_capturing()
    }

    fn current_frame(&mut self) -> Option<Frame> {
        if let Some(frame) = self.frames.take() {
            self.last = Some(frame);
        }
        self.last.clone()
    }
}

impl Drop for CameraFrameSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn decode_buffer(buffer: &Buffer) -> Result<RgbaImage> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    let image = match buffer.source_frame_format() {
        FrameFormat::NV12 => rgba_from_raw(width, height, nv12_to_rgba(data, width, height)?)?,
        FrameFormat::YUYV => rgba_from_raw(width, height, yuyv_to_rgba(data, width, height)?)?,
        FrameFormat::MJPEG => mjpeg_to_rgba(data)?,
        FrameFormat::RAWRGB => {
            let rgb = RgbImage::from_raw(width, height, packed(data, width, height, 3)?)
                .ok_or_else(|| anyhow!("RGB frame does not fit {width}x{height}"))?;
            DynamicImage::ImageRgb8(rgb).to_rgba8()
        }
        FrameFormat::RAWBGR => {
            let mut bgr = packed(data, width, height, 3)?;
            bgr.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
            let rgb = RgbImage::from_raw(width, height, bgr)
                .ok_or_else(|| anyhow!("BGR frame does not fit {width}x{height}"))?;
            DynamicImage::ImageRgb8(rgb).to_rgba8()
        }
        FrameFormat::GRAY => {
            let gray = GrayImage::from_raw(width, height, packed(data, width, height, 1)?)
                .ok_or_else(|| anyhow!("GRAY frame does not fit {width}x{height}"))?;
            DynamicImage::ImageLuma8(gray).to_rgba8()
        }
    };
    Ok(image)
}

/// Leading `width * height * channels` bytes of `data`.
fn packed(data: &[u8], width: u32, height: u32, channels: usize) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * channels;
    if data.len() < expected {
        return Err(anyhow!(
            "frame buffer too small: got {}, expected {}",
            data.len(),
            expected
        ));
    }
    Ok(data[..expected].to_vec())
}

fn rgba_from_raw(width: u32, height: u32, rgba: Vec<u8>) -> Result<RgbaImage> {
    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("decoded frame does not fit {width}x{height}"))
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    if data.len() < y_len + uv_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_len + uv_len
        ));
    }

    let planes = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &planes,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 2;
    if data.len() < expected {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected
        ));
    }

    let packed = YuvPackedImage {
        yuy: &data[..expected],
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8]) -> Result<RgbaImage> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    rgba_from_raw(width, height, rgba)
}
