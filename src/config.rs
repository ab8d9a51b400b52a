use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{error::EngineError, model_download::default_model_path};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub silhouette: SilhouetteConfig,
    pub overlay: OverlayConfig,
    pub difference: DifferenceConfig,
    pub scheduler: SchedulerConfig,
    pub estimator: EstimatorConfig,
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        self.silhouette.validate()?;
        self.overlay.validate()?;
        self.difference.validate()?;
        self.scheduler.validate()?;
        self.estimator.validate()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SilhouetteConfig {
    pub confidence_threshold: f32,
    /// Scale of the torso quad around its centroid; 1.0 keeps the literal keypoints.
    pub torso_expansion: f32,
    pub head_expansion: f32,
    pub min_head_radius: f32,
    pub default_head_radius: f32,
    pub shoulder_to_head_divisor: f32,
    pub min_limb_thickness: f32,
    pub limb_shoulder_ratio: f32,
    pub arm_expansion: f32,
    pub leg_expansion: f32,
    pub lower_leg_ratio: f32,
    pub extremity_extensions: bool,
    pub fill_alpha: u8,
    pub feather: FeatherConfig,
}

impl Default for SilhouetteConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            torso_expansion: 1.15,
            head_expansion: 1.2,
            min_head_radius: 12.0,
            default_head_radius: 30.0,
            shoulder_to_head_divisor: 2.5,
            min_limb_thickness: 48.0,
            limb_shoulder_ratio: 0.6,
            arm_expansion: 1.0,
            leg_expansion: 1.1,
            lower_leg_ratio: 0.9,
            extremity_extensions: true,
            fill_alpha: 255,
            feather: FeatherConfig::default(),
        }
    }
}

impl SilhouetteConfig {
    fn validate(&self) -> std::result::Result<(), EngineError> {
        check_confidence("silhouette.confidence_threshold", self.confidence_threshold)?;
        check_positive("silhouette.torso_expansion", self.torso_expansion)?;
        check_positive("silhouette.head_expansion", self.head_expansion)?;
        check_positive("silhouette.min_head_radius", self.min_head_radius)?;
        check_positive("silhouette.default_head_radius", self.default_head_radius)?;
        check_positive(
            "silhouette.shoulder_to_head_divisor",
            self.shoulder_to_head_divisor,
        )?;
        check_positive("silhouette.min_limb_thickness", self.min_limb_thickness)?;
        check_positive("silhouette.limb_shoulder_ratio", self.limb_shoulder_ratio)?;
        check_positive("silhouette.arm_expansion", self.arm_expansion)?;
        check_positive("silhouette.leg_expansion", self.leg_expansion)?;
        check_positive("silhouette.lower_leg_ratio", self.lower_leg_ratio)?;
        self.feather.validate()
    }
}

/// Dilation + blur applied after rasterising. Off by default, so masks keep
/// hard edges and difference scoring sees exact coverage; [`FeatherConfig::soft`]
/// gives the grown, blurred outline used for display.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatherConfig {
    pub dilation_iterations: u8,
    pub blur_kernel_size: u32,
}

impl FeatherConfig {
    /// Ten dilation passes followed by a 21px blur.
    pub fn soft() -> Self {
        Self {
            dilation_iterations: 10,
            blur_kernel_size: 21,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dilation_iterations > 0 || self.blur_kernel_size > 1
    }

    /// Blur kernels must be odd; even sizes round up.
    pub fn odd_kernel_size(&self) -> u32 {
        if self.blur_kernel_size % 2 == 0 {
            self.blur_kernel_size + 1
        } else {
            self.blur_kernel_size
        }
    }

    fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.blur_kernel_size > 255 {
            return Err(EngineError::config(
                "silhouette.feather.blur_kernel_size",
                "must be at most 255",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Threshold for skeleton lines and bounding boxes.
    pub confidence_threshold: f32,
    pub bbox_padding: f32,
    pub skeleton_thickness: i32,
    pub skeleton_color: [u8; 4],
    pub joint_color: [u8; 4],
    /// Background used when flattening a cutout into an opaque frame.
    pub flatten_background: [u8; 3],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            bbox_padding: 20.0,
            skeleton_thickness: 6,
            skeleton_color: [56, 189, 248, 255],
            joint_color: [248, 113, 113, 255],
            flatten_background: [255, 255, 255],
        }
    }
}

impl OverlayConfig {
    fn validate(&self) -> std::result::Result<(), EngineError> {
        check_confidence("overlay.confidence_threshold", self.confidence_threshold)?;
        if self.bbox_padding < 0.0 || !self.bbox_padding.is_finite() {
            return Err(EngineError::config(
                "overlay.bbox_padding",
                "must be a finite value >= 0",
            ));
        }
        if self.skeleton_thickness < 1 {
            return Err(EngineError::config(
                "overlay.skeleton_thickness",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DifferenceConfig {
    pub downsample_factor: u32,
    /// Coverage values strictly above this count as "on".
    pub on_threshold: u8,
    /// Overrides the silhouette threshold for the live mask in difference mode.
    pub confidence_threshold: Option<f32>,
    pub label_scale: u32,
    pub draw_label: bool,
}

impl Default for DifferenceConfig {
    fn default() -> Self {
        Self {
            downsample_factor: 4,
            on_threshold: 128,
            confidence_threshold: None,
            label_scale: 4,
            draw_label: true,
        }
    }
}

impl DifferenceConfig {
    fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.downsample_factor == 0 {
            return Err(EngineError::config(
                "difference.downsample_factor",
                "must be at least 1",
            ));
        }
        if self.label_scale == 0 {
            return Err(EngineError::config(
                "difference.label_scale",
                "must be at least 1",
            ));
        }
        if let Some(threshold) = self.confidence_threshold {
            check_confidence("difference.confidence_threshold", threshold)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Estimation is re-issued every this many drawn ticks.
    pub estimate_interval: u32,
    /// Hold back new requests while one is still in flight.
    pub gate_on_settled: bool,
    pub processing_width: Option<u32>,
    pub mirror: bool,
    /// Rescale target frames to the live frame size. When off, a size
    /// mismatch aborts the frame instead.
    pub fit_target: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            estimate_interval: 2,
            gate_on_settled: true,
            processing_width: None,
            mirror: false,
            fit_target: true,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.estimate_interval == 0 {
            return Err(EngineError::config(
                "scheduler.estimate_interval",
                "must be at least 1",
            ));
        }
        if self.processing_width == Some(0) {
            return Err(EngineError::config(
                "scheduler.processing_width",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Working resolution for a `width`×`height` source: narrowed to
    /// `processing_width` (never widened) with an even height.
    pub fn processing_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match self.processing_width {
            Some(target_w) if target_w > 0 && target_w < width && width > 0 => {
                let target_h = (target_w as u64 * height as u64 / width as u64) as u32;
                let target_h = if target_h % 2 == 0 { target_h } else { target_h + 1 };
                (target_w, target_h.max(2))
            }
            _ => (width, height),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveNetVariant {
    Lightning,
    Thunder,
    MultiposeLightning,
}

impl MoveNetVariant {
    pub fn input_size(&self) -> u32 {
        match self {
            MoveNetVariant::Lightning => 192,
            MoveNetVariant::Thunder => 256,
            MoveNetVariant::MultiposeLightning => 256,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MoveNetVariant::Lightning => "lightning",
            MoveNetVariant::Thunder => "thunder",
            MoveNetVariant::MultiposeLightning => "multipose_lightning",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub variant: MoveNetVariant,
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    /// Poses (multi-pose) or whole detections (single-pose) below this are dropped.
    pub detection_threshold: f32,
    pub intra_threads: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            variant: MoveNetVariant::Thunder,
            model_path: default_model_path(MoveNetVariant::Thunder),
            model_url: None,
            detection_threshold: 0.3,
            intra_threads: 2,
        }
    }
}

impl EstimatorConfig {
    fn validate(&self) -> std::result::Result<(), EngineError> {
        check_threshold("estimator.detection_threshold", self.detection_threshold)?;
        if self.intra_threads == 0 {
            return Err(EngineError::config(
                "estimator.intra_threads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn check_threshold(field: &str, value: f32) -> std::result::Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::config(field, "must be within [0, 1]"));
    }
    Ok(())
}

/// Keypoint usability cutoff. Zero is refused because unfilled keypoints
/// carry score 0 at the origin and would pass a `>=` test.
fn check_confidence(field: &str, value: f32) -> std::result::Result<(), EngineError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(EngineError::config(field, "must be within (0, 1]"));
    }
    Ok(())
}

fn check_positive(field: &str, value: f32) -> std::result::Result<(), EngineError> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(EngineError::config(field, "must be a finite value > 0"));
    }
    Ok(())
}
