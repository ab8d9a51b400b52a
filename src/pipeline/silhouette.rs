use image::GrayImage;
use imageproc::{distance_transform::Norm, filter::gaussian_blur_f32, morphology::dilate};

use super::raster::{self, Point};
use crate::{
    config::{FeatherConfig, SilhouetteConfig},
    types::{KeypointIndex, Pose},
};

pub const TORSO: [KeypointIndex; 4] = [
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
    KeypointIndex::RightHip,
    KeypointIndex::LeftHip,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimbClass {
    Arm,
    Leg,
}

#[derive(Clone, Copy, Debug)]
pub struct LimbChain {
    pub name: &'static str,
    pub class: LimbClass,
    /// Root, middle joint, extremity.
    pub joints: [KeypointIndex; 3],
}

pub const LIMB_CHAINS: [LimbChain; 4] = [
    LimbChain {
        name: "left_arm",
        class: LimbClass::Arm,
        joints: [
            KeypointIndex::LeftShoulder,
            KeypointIndex::LeftElbow,
            KeypointIndex::LeftWrist,
        ],
    },
    LimbChain {
        name: "right_arm",
        class: LimbClass::Arm,
        joints: [
            KeypointIndex::RightShoulder,
            KeypointIndex::RightElbow,
            KeypointIndex::RightWrist,
        ],
    },
    LimbChain {
        name: "left_leg",
        class: LimbClass::Leg,
        joints: [
            KeypointIndex::LeftHip,
            KeypointIndex::LeftKnee,
            KeypointIndex::LeftAnkle,
        ],
    },
    LimbChain {
        name: "right_leg",
        class: LimbClass::Leg,
        joints: [
            KeypointIndex::RightHip,
            KeypointIndex::RightKnee,
            KeypointIndex::RightAnkle,
        ],
    },
];

pub struct SilhouetteBuilder {
    cfg: SilhouetteConfig,
}

impl SilhouetteBuilder {
    pub fn new(cfg: SilhouetteConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SilhouetteConfig {
        &self.cfg
    }

    /// Same geometry, different confidence cut-off.
    pub fn with_threshold(&self, threshold: f32) -> Self {
        let mut cfg = self.cfg.clone();
        cfg.confidence_threshold = threshold;
        Self { cfg }
    }

    /// Fills every pose into a fresh mask and applies feathering once.
    pub fn build_all(&self, poses: &[Pose], width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for pose in poses {
            self.draw_pose(&mut mask, pose);
        }
        feather(mask, &self.cfg.feather)
    }

    /// Rasterises one body into `mask`. Sub-threshold keypoints simply drop
    /// the shapes they would take part in.
    pub fn draw_pose(&self, mask: &mut GrayImage, pose: &Pose) {
        let threshold = self.cfg.confidence_threshold;
        let value = self.cfg.fill_alpha;
        let at = |index| pose.confident(index, threshold);

        let shoulders = at(KeypointIndex::LeftShoulder).zip(at(KeypointIndex::RightShoulder));
        let shoulder_width = shoulders.map(|(l, r)| distance(l, r));

        if let Some(quad) = self.torso_quad(pose) {
            raster::fill_polygon(mask, &quad, value);
        }

        if let Some(nose) = at(KeypointIndex::Nose) {
            raster::fill_disk(mask, nose, self.head_radius(shoulder_width), value);
            if let Some((left, right)) = shoulders {
                raster::fill_polygon(mask, &[nose, left, right], value);
            }
        }

        let base_thickness = self.limb_thickness(shoulder_width);
        for chain in &LIMB_CHAINS {
            let expansion = match chain.class {
                LimbClass::Arm => self.cfg.arm_expansion,
                LimbClass::Leg => self.cfg.leg_expansion,
            };
            let upper = base_thickness * expansion;
            let lower = match chain.class {
                LimbClass::Arm => upper,
                LimbClass::Leg => upper * self.cfg.lower_leg_ratio,
            };

            let [root, middle, end] = chain.joints.map(at);
            if let (Some(a), Some(b)) = (root, middle) {
                raster::fill_capsule(mask, a, b, upper, value);
            }
            if let (Some(b), Some(c)) = (middle, end) {
                raster::fill_capsule(mask, b, c, lower, value);
                if self.cfg.extremity_extensions {
                    if let Some(tip) = extend(b, c, lower) {
                        raster::fill_capsule(mask, c, tip, lower, value);
                    }
                }
            }
        }
    }

    /// Torso quadrilateral scaled around its centroid, if all four corners are confident.
    pub fn torso_quad(&self, pose: &Pose) -> Option<[Point; 4]> {
        let threshold = self.cfg.confidence_threshold;
        let mut quad = [(0.0, 0.0); 4];
        for (slot, index) in quad.iter_mut().zip(TORSO) {
            *slot = pose.confident(index, threshold)?;
        }
        let cx = quad.iter().map(|p| p.0).sum::<f32>() / 4.0;
        let cy = quad.iter().map(|p| p.1).sum::<f32>() / 4.0;
        let factor = self.cfg.torso_expansion;
        Some(quad.map(|(x, y)| (cx + (x - cx) * factor, cy + (y - cy) * factor)))
    }

    pub fn head_radius(&self, shoulder_width: Option<f32>) -> f32 {
        let radius = match shoulder_width {
            Some(width) => {
                (width / self.cfg.shoulder_to_head_divisor).max(self.cfg.min_head_radius)
            }
            None => self.cfg.default_head_radius,
        };
        radius * self.cfg.head_expansion
    }

    pub fn limb_thickness(&self, shoulder_width: Option<f32>) -> f32 {
        match shoulder_width {
            Some(width) => (width * self.cfg.limb_shoulder_ratio).max(self.cfg.min_limb_thickness),
            None => self.cfg.min_limb_thickness,
        }
    }
}

fn distance(a: Point, b: Point) -> f32 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Continues the `from → to` direction past `to` by `length`.
fn extend(from: Point, to: Point, length: f32) -> Option<Point> {
    let len = distance(from, to);
    if len <= f32::EPSILON {
        return None;
    }
    let (ux, uy) = ((to.0 - from.0) / len, (to.1 - from.1) / len);
    Some((to.0 + ux * length, to.1 + uy * length))
}

/// Dilation followed by a Gaussian blur, sized like OpenCV's `GaussianBlur(ksize, 0)`.
pub fn feather(mask: GrayImage, cfg: &FeatherConfig) -> GrayImage {
    if !cfg.is_enabled() || mask.width() == 0 || mask.height() == 0 {
        return mask;
    }
    let mut mask = mask;
    if cfg.dilation_iterations > 0 {
        mask = dilate(&mask, Norm::LInf, cfg.dilation_iterations);
    }
    if cfg.blur_kernel_size > 1 {
        let ksize = cfg.odd_kernel_size() as f32;
        let sigma = 0.3 * ((ksize - 1.0) * 0.5 - 1.0) + 0.8;
        mask = gaussian_blur_f32(&mask, sigma);
    }
    mask
}
