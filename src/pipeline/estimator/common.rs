use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;

use crate::types::{Frame, Keypoint, KeypointIndex, Pose};

const VALUES_PER_KEYPOINT: usize = 3;
const KEYPOINT_VALUES: usize = KeypointIndex::COUNT * VALUES_PER_KEYPOINT;
/// Multi-pose rows carry 17×(y, x, score) followed by (ymin, xmin, ymax, xmax, score).
const MULTIPOSE_ROW: usize = KEYPOINT_VALUES + 5;
const PERSON_SCORE_OFFSET: usize = KEYPOINT_VALUES + 4;

#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub input_size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    pub fn new(orig_w: u32, orig_h: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let scale = (size / orig_h as f32).min(size / orig_w as f32);
        let (new_w, new_h) = scaled_size(orig_w, orig_h, scale);
        Self {
            input_size,
            scale,
            pad_x: (input_size.saturating_sub(new_w) / 2) as f32,
            pad_y: (input_size.saturating_sub(new_h) / 2) as f32,
            orig_w,
            orig_h,
        }
    }

    fn resized(&self) -> (u32, u32) {
        scaled_size(self.orig_w, self.orig_h, self.scale)
    }

    /// Maps a normalized `(y, x)` model output back into source-frame pixels.
    pub fn project(&self, y_norm: f32, x_norm: f32) -> (f32, f32) {
        let size = self.input_size as f32;
        let x = (x_norm * size - self.pad_x) / self.scale;
        let y = (y_norm * size - self.pad_y) / self.scale;
        (
            x.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            y.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

/// Aspect-preserving resize onto a zero-padded square, as an int32 NHWC tensor.
pub fn prepare_frame(frame: &Frame, input_size: u32) -> Result<(Array4<i32>, LetterboxInfo)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }
    if frame.is_empty() {
        return Err(anyhow!("cannot estimate on an empty frame"));
    }

    let letterbox = LetterboxInfo::new(frame.width, frame.height, input_size);
    let (new_w, new_h) = letterbox.resized();

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let side = input_size as usize;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let mut input = Array4::<i32>::zeros((1, side, side, 3));
    for (row, line) in resized.chunks_exact(new_w as usize * 4).enumerate() {
        for (col, px) in line.chunks_exact(4).enumerate() {
            for channel in 0..3 {
                input[[0, pad_y + row, pad_x + col, channel]] = px[channel] as i32;
            }
        }
    }

    Ok((input, letterbox))
}

/// Decodes a MoveNet output tensor. Single-pose outputs are `[1, 1, 17, 3]`
/// and multi-pose outputs are `[1, N, 56]`.
pub fn decode_poses(
    data: &[f32],
    shape: &[usize],
    letterbox: &LetterboxInfo,
    detection_threshold: f32,
) -> Result<Vec<Pose>> {
    let expected: usize = shape.iter().product();
    if data.len() < expected {
        return Err(anyhow!(
            "output tensor too short: got {}, shape {:?}",
            data.len(),
            shape
        ));
    }

    match shape {
        [_, 1, keypoints, values]
            if *keypoints == KeypointIndex::COUNT && *values == VALUES_PER_KEYPOINT =>
        {
            let flat = &data[..KEYPOINT_VALUES];
            let best = flat
                .chunks_exact(VALUES_PER_KEYPOINT)
                .map(|kp| kp[2])
                .fold(0.0f32, f32::max);
            if best > detection_threshold {
                Ok(vec![decode_keypoints(flat, letterbox, None)])
            } else {
                Ok(Vec::new())
            }
        }
        [_, people, row] if *row >= MULTIPOSE_ROW => Ok(data
            .chunks_exact(*row)
            .take(*people)
            .filter(|person| person[PERSON_SCORE_OFFSET] > detection_threshold)
            .map(|person| {
                decode_keypoints(&person[..KEYPOINT_VALUES], letterbox, Some(detection_threshold))
            })
            .collect()),
        _ => Err(anyhow!("unexpected MoveNet output shape {:?}", shape)),
    }
}

/// `zero_below` keeps the score but discards the position of weak keypoints.
fn decode_keypoints(flat: &[f32], letterbox: &LetterboxInfo, zero_below: Option<f32>) -> Pose {
    let mut pose = Pose::default();
    for ((kp, index), values) in pose
        .keypoints
        .iter_mut()
        .zip(KeypointIndex::ALL)
        .zip(flat.chunks_exact(VALUES_PER_KEYPOINT))
    {
        let score = values[2];
        let (x, y) = match zero_below {
            Some(threshold) if score < threshold => (0.0, 0.0),
            _ => letterbox.project(values[0], values[1]),
        };
        *kp = Keypoint::new(index, x, y, score);
    }
    pose
}
