// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Target direction relative to the drone's heading.

use crate::sample::{Direction, ZERO_DIRECTION};

/// Below this distance (meters) the direction is undefined.
pub const MIN_DISTANCE: f32 = 1e-4;

/// Unit vector towards `target_position` in the drone's yaw frame, plus the
/// Euclidean distance.
///
/// Only yaw (`drone_orientation[2]`, radians) is applied; roll and pitch are
/// ignored. Returns the zero vector when the target is closer than
/// [`MIN_DISTANCE`].
pub fn relative_direction(
    drone_position: [f32; 3],
    drone_orientation: [f32; 3],
    target_position: [f32; 3],
) -> (Direction, f32) {
    let dx = target_position[0] - drone_position[0];
    let dy = target_position[1] - drone_position[1];
    let dz = target_position[2] - drone_position[2];

    let (sin, cos) = drone_orientation[2].sin_cos();
    let local = [-dx * sin + dy * cos, -dx * cos - dy * sin, dz];

    let distance = (local[0] * local[0] + local[1] * local[1] + local[2] * local[2]).sqrt();
    if distance < MIN_DISTANCE {
        return (ZERO_DIRECTION, distance);
    }

    (local.map(|c| c / distance), distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: [f32; 3], b: [f32; 3]) {
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_zero_yaw() {
        let (dir, dist) = relative_direction([0.0; 3], [0.0; 3], [0.0, 2.0, 0.0]);
        assert!((dist - 2.0).abs() < 1e-6);
        assert_close(dir, [1.0, 0.0, 0.0]);

        let (dir, _) = relative_direction([0.0; 3], [0.0; 3], [3.0, 0.0, 0.0]);
        assert_close(dir, [0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_yaw_rotation() {
        let yaw = std::f32::consts::FRAC_PI_2;
        let (dir, _) = relative_direction([1.0, 1.0, 0.0], [0.0, 0.0, yaw], [2.0, 1.0, 0.0]);
        assert_close(dir, [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_vertical_offset_and_norm() {
        let (dir, dist) = relative_direction([0.0; 3], [0.3, -0.2, 1.1], [1.0, 2.0, 2.0]);
        assert!((dist - 3.0).abs() < 1e-5);
        let norm = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((dir[2] - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_coincident_target() {
        let (dir, dist) = relative_direction([1.0, 2.0, 3.0], [0.0; 3], [1.0, 2.0, 3.0]);
        assert_eq!(dir, ZERO_DIRECTION);
        assert!(dist < MIN_DISTANCE);
    }
}
