use std::time::Instant;

use image::RgbaImage;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            rgba: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Returns `None` when the buffer length does not match the dimensions.
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// MoveNet / COCO keypoint topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; KeypointIndex::COUNT] = [
        KeypointIndex::Nose,
        KeypointIndex::LeftEye,
        KeypointIndex::RightEye,
        KeypointIndex::LeftEar,
        KeypointIndex::RightEar,
        KeypointIndex::LeftShoulder,
        KeypointIndex::RightShoulder,
        KeypointIndex::LeftElbow,
        KeypointIndex::RightElbow,
        KeypointIndex::LeftWrist,
        KeypointIndex::RightWrist,
        KeypointIndex::LeftHip,
        KeypointIndex::RightHip,
        KeypointIndex::LeftKnee,
        KeypointIndex::RightKnee,
        KeypointIndex::LeftAnkle,
        KeypointIndex::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            KeypointIndex::Nose => "nose",
            KeypointIndex::LeftEye => "left_eye",
            KeypointIndex::RightEye => "right_eye",
            KeypointIndex::LeftEar => "left_ear",
            KeypointIndex::RightEar => "right_ear",
            KeypointIndex::LeftShoulder => "left_shoulder",
            KeypointIndex::RightShoulder => "right_shoulder",
            KeypointIndex::LeftElbow => "left_elbow",
            KeypointIndex::RightElbow => "right_elbow",
            KeypointIndex::LeftWrist => "left_wrist",
            KeypointIndex::RightWrist => "right_wrist",
            KeypointIndex::LeftHip => "left_hip",
            KeypointIndex::RightHip => "right_hip",
            KeypointIndex::LeftKnee => "left_knee",
            KeypointIndex::RightKnee => "right_knee",
            KeypointIndex::LeftAnkle => "left_ankle",
            KeypointIndex::RightAnkle => "right_ankle",
        }
    }
}

/// One scored landmark, in the pixel space of the frame it was estimated from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    pub index: KeypointIndex,
}

impl Keypoint {
    pub fn new(index: KeypointIndex, x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score, index }
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.score >= threshold
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    /// Position of `index` when its score clears `threshold`.
    pub fn confident(&self, index: KeypointIndex, threshold: f32) -> Option<(f32, f32)> {
        let kp = self.get(index);
        kp.is_confident(threshold).then(|| kp.position())
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Pose {
        let mut keypoints = self.keypoints;
        for kp in keypoints.iter_mut() {
            kp.x *= sx;
            kp.y *= sy;
        }
        Pose { keypoints }
    }
}

impl Default for Pose {
    fn default() -> Self {
        let mut keypoints = [Keypoint::new(KeypointIndex::Nose, 0.0, 0.0, 0.0); KeypointIndex::COUNT];
        for (kp, index) in keypoints.iter_mut().zip(KeypointIndex::ALL) {
            kp.index = index;
        }
        Self { keypoints }
    }
}

/// Every pose from one estimation cycle, tagged with the frame size it refers to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseSet {
    pub poses: Vec<Pose>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PoseSet {
    pub fn new(poses: Vec<Pose>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            poses,
            frame_width,
            frame_height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Re-expresses every pose in the pixel space of a `width`×`height` raster.
    pub fn rescaled_to(&self, width: u32, height: u32) -> Vec<Pose> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Vec::new();
        }
        if self.frame_width == width && self.frame_height == height {
            return self.poses.clone();
        }
        let sx = width as f32 / self.frame_width as f32;
        let sy = height as f32 / self.frame_height as f32;
        self.poses.iter().map(|pose| pose.scaled(sx, sy)).collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreResult {
    pub matched_pixels: u32,
    pub target_pixels: u32,
    pub percentage: f32,
}

impl ScoreResult {
    pub fn from_counts(matched_pixels: u32, target_pixels: u32) -> Self {
        let percentage = if target_pixels == 0 {
            0.0
        } else {
            matched_pixels as f32 / target_pixels as f32 * 100.0
        };
        Self {
            matched_pixels,
            target_pixels,
            percentage,
        }
    }

    pub fn display_text(&self) -> String {
        format!("{:.1}%", self.percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_index_from_index() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
    }

    #[test]
    fn test_default_pose_indices_follow_topology() {
        let pose = Pose::default();
        for (i, kp) in pose.keypoints.iter().enumerate() {
            assert_eq!(kp.index as usize, i);
            assert_eq!(kp.score, 0.0);
        }
    }

    #[test]
    fn test_confident_respects_threshold() {
        let mut pose = Pose::default();
        pose.keypoints[KeypointIndex::Nose as usize] =
            Keypoint::new(KeypointIndex::Nose, 10.0, 20.0, 0.5);
        assert_eq!(pose.confident(KeypointIndex::Nose, 0.5), Some((10.0, 20.0)));
        assert_eq!(pose.confident(KeypointIndex::Nose, 0.6), None);
    }

    #[test]
    fn test_pose_set_rescale() {
        let mut pose = Pose::default();
        pose.keypoints[0] = Keypoint::new(KeypointIndex::Nose, 10.0, 20.0, 1.0);
        let set = PoseSet::new(vec![pose], 100, 50);
        let scaled = set.rescaled_to(200, 200);
        assert_eq!(scaled[0].keypoints[0].x, 20.0);
        assert_eq!(scaled[0].keypoints[0].y, 80.0);
        assert!(PoseSet::new(vec![Pose::default()], 0, 0).rescaled_to(10, 10).is_empty());
    }

    #[test]
    fn test_score_result_zero_target() {
        let score = ScoreResult::from_counts(3, 0);
        assert_eq!(score.percentage, 0.0);
        let score = ScoreResult::from_counts(1, 4);
        assert!((score.percentage - 25.0).abs() < 1e-6);
        assert_eq!(score.display_text(), "25.0%");
    }
}
