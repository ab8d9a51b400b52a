use image::RgbaImage;

use crate::types::{KeypointIndex, Pose};

pub const CONNECTIONS: &[(KeypointIndex, KeypointIndex)] = &[
    (KeypointIndex::LeftShoulder, KeypointIndex::RightShoulder),
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow),
    (KeypointIndex::RightShoulder, KeypointIndex::RightElbow),
    (KeypointIndex::LeftElbow, KeypointIndex::LeftWrist),
    (KeypointIndex::RightElbow, KeypointIndex::RightWrist),
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftHip),
    (KeypointIndex::RightShoulder, KeypointIndex::RightHip),
    (KeypointIndex::LeftHip, KeypointIndex::RightHip),
    (KeypointIndex::LeftHip, KeypointIndex::LeftKnee),
    (KeypointIndex::RightHip, KeypointIndex::RightKnee),
    (KeypointIndex::LeftKnee, KeypointIndex::LeftAnkle),
    (KeypointIndex::RightKnee, KeypointIndex::RightAnkle),
];

#[derive(Clone, Copy, Debug)]
pub struct SkeletonStyle {
    pub threshold: f32,
    pub thickness: i32,
    pub line_color: [u8; 4],
    pub joint_color: [u8; 4],
}

pub fn draw_skeleton(image: &mut RgbaImage, pose: &Pose, style: &SkeletonStyle) {
    let (width, height) = image.dimensions();
    let buffer: &mut [u8] = image;

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (
            pose.confident(a, style.threshold),
            pose.confident(b, style.threshold),
        ) {
            draw_line(buffer, width, height, &pa, &pb, style.line_color, style.thickness);
        }
    }

    let point_radius = (style.thickness / 2).max(2) + 1;
    for kp in pose.keypoints.iter().filter(|kp| kp.is_confident(style.threshold)) {
        draw_circle(
            buffer,
            width,
            height,
            (kp.x as i32, kp.y as i32),
            point_radius,
            style.joint_color,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        if radius > 0 {
            draw_circle(buffer, width, height, (x0, y0), radius, color);
        } else {
            put_pixel_safe(buffer, width, height, x0, y0, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keypoint;

    const STYLE: SkeletonStyle = SkeletonStyle {
        threshold: 0.3,
        thickness: 3,
        line_color: [0, 0, 255, 255],
        joint_color: [255, 0, 0, 255],
    };

    #[test]
    fn test_line_drawn_between_confident_joints() {
        let mut pose = Pose::default();
        pose.keypoints[5] = Keypoint::new(KeypointIndex::LeftShoulder, 5.0, 10.0, 0.9);
        pose.keypoints[6] = Keypoint::new(KeypointIndex::RightShoulder, 35.0, 10.0, 0.9);
        let mut image = RgbaImage::new(40, 20);
        draw_skeleton(&mut image, &pose, &STYLE);
        assert_eq!(image.get_pixel(20, 10).0, [0, 0, 255, 255]);
        assert_eq!(image.get_pixel(5, 10).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_low_confidence_joint_not_drawn() {
        let mut pose = Pose::default();
        pose.keypoints[5] = Keypoint::new(KeypointIndex::LeftShoulder, 5.0, 10.0, 0.9);
        pose.keypoints[6] = Keypoint::new(KeypointIndex::RightShoulder, 35.0, 10.0, 0.1);
        let mut image = RgbaImage::new(40, 20);
        draw_skeleton(&mut image, &pose, &STYLE);
        assert_eq!(image.get_pixel(20, 10).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(35, 10).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_bounds_points_are_clipped() {
        let mut pose = Pose::default();
        pose.keypoints[11] = Keypoint::new(KeypointIndex::LeftHip, -50.0, -50.0, 0.9);
        pose.keypoints[12] = Keypoint::new(KeypointIndex::RightHip, 80.0, 80.0, 0.9);
        let mut image = RgbaImage::new(10, 10);
        draw_skeleton(&mut image, &pose, &STYLE);
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 255, 255]);
    }
}
