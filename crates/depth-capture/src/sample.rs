// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-tick observation types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance stored when no target is visible.
pub const NO_TARGET_DISTANCE: f32 = -1.0;

/// Direction stored when no target is visible.
pub const ZERO_DIRECTION: [f32; 3] = [0.0, 0.0, 0.0];

/// Drone pose: position `[x, y, z]` followed by orientation `[roll, pitch, yaw]`.
pub type Pose = [f32; 6];

/// Unit vector towards the target, in the drone's yaw frame.
pub type Direction = [f32; 3];

/// Depth map construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DepthError {
    #[error("Depth buffer has {got} values, expected {width}x{height}")]
    SizeMismatch { width: u32, height: u32, got: usize },

    #[error("Depth map must not be empty")]
    Empty,
}

/// Row-major H×W depth image.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthMap {
    /// Wrap a row-major buffer of `width * height` values.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, DepthError> {
        if width == 0 || height == 0 {
            return Err(DepthError::Empty);
        }
        if data.len() != width as usize * height as usize {
            return Err(DepthError::SizeMismatch {
                width,
                height,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Depth map filled with a constant value.
    pub fn filled(width: u32, height: u32, value: f32) -> Result<Self, DepthError> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(height, width)`, the order arrays are stored in.
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Value at `(row, col)`.
    pub fn get(&self, row: u32, col: u32) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }
}

/// Dominant discrete control input at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActionLabel {
    Right = 0,
    Left = 1,
    Forward = 2,
    Back = 3,
    Up = 4,
    Down = 5,
    YawRight = 6,
    YawLeft = 7,
    #[default]
    Hover = 8,
}

impl ActionLabel {
    /// Translation magnitude below which a move event is ignored.
    pub const MOVE_THRESHOLD: f32 = 0.1;

    /// Rotation magnitude at or below which the drone counts as hovering.
    pub const ROTATE_THRESHOLD: f32 = 0.01;

    /// Label for a translation command, or `None` if every axis is below threshold.
    ///
    /// The axis with the largest magnitude wins; ties resolve x, then y, then z.
    pub fn from_move(dx: f32, dy: f32, dz: f32) -> Option<Self> {
        let (ax, ay, az) = (dx.abs(), dy.abs(), dz.abs());
        if ax <= Self::MOVE_THRESHOLD && ay <= Self::MOVE_THRESHOLD && az <= Self::MOVE_THRESHOLD {
            return None;
        }

        let max = ax.max(ay).max(az);
        let label = if max == ax {
            if dx > 0.0 {
                Self::Right
            } else {
                Self::Left
            }
        } else if max == ay {
            if dy > 0.0 {
                Self::Forward
            } else {
                Self::Back
            }
        } else if dz > 0.0 {
            Self::Up
        } else {
            Self::Down
        };
        Some(label)
    }

    /// Label for a yaw command.
    pub fn from_rotate(delta: f32) -> Self {
        if delta.abs() > Self::ROTATE_THRESHOLD {
            if delta > 0.0 {
                Self::YawRight
            } else {
                Self::YawLeft
            }
        } else {
            Self::Hover
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Right,
            1 => Self::Left,
            2 => Self::Forward,
            3 => Self::Back,
            4 => Self::Up,
            5 => Self::Down,
            6 => Self::YawRight,
            7 => Self::YawLeft,
            8 => Self::Hover,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Right => "right",
            Self::Left => "left",
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Up => "up",
            Self::Down => "down",
            Self::YawRight => "yaw-right",
            Self::YawLeft => "yaw-left",
            Self::Hover => "hover",
        }
    }
}

impl std::fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One captured observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub depth: DepthMap,
    pub pose: Pose,
    pub frame_index: u64,
    /// `<= 0` means no target visible.
    pub distance: f32,
    pub action_label: ActionLabel,
    pub direction: Direction,
}

impl Sample {
    /// True when the sample carries a visible target.
    pub fn has_target(&self) -> bool {
        self.distance > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_map_size_check() {
        assert!(DepthMap::new(2, 3, vec![0.0; 6]).is_ok());
        assert_eq!(
            DepthMap::new(2, 3, vec![0.0; 5]),
            Err(DepthError::SizeMismatch {
                width: 2,
                height: 3,
                got: 5
            })
        );
        assert_eq!(DepthMap::new(0, 3, Vec::new()), Err(DepthError::Empty));
    }

    #[test]
    fn test_action_from_move_dominant_axis() {
        assert_eq!(ActionLabel::from_move(0.5, 0.2, 0.0), Some(ActionLabel::Right));
        assert_eq!(ActionLabel::from_move(-0.5, 0.2, 0.0), Some(ActionLabel::Left));
        assert_eq!(ActionLabel::from_move(0.0, 0.3, 0.1), Some(ActionLabel::Forward));
        assert_eq!(ActionLabel::from_move(0.0, -0.3, 0.1), Some(ActionLabel::Back));
        assert_eq!(ActionLabel::from_move(0.0, 0.0, 0.2), Some(ActionLabel::Up));
        assert_eq!(ActionLabel::from_move(0.0, 0.0, -0.2), Some(ActionLabel::Down));
    }

    #[test]
    fn test_action_from_move_below_threshold() {
        assert_eq!(ActionLabel::from_move(0.05, -0.1, 0.0), None);
    }

    #[test]
    fn test_action_from_rotate() {
        assert_eq!(ActionLabel::from_rotate(0.2), ActionLabel::YawRight);
        assert_eq!(ActionLabel::from_rotate(-0.2), ActionLabel::YawLeft);
        assert_eq!(ActionLabel::from_rotate(0.005), ActionLabel::Hover);
    }

    #[test]
    fn test_action_u8_roundtrip() {
        for value in 0..=8u8 {
            let label = ActionLabel::from_u8(value).expect("label");
            assert_eq!(label.as_u8(), value);
        }
        assert_eq!(ActionLabel::from_u8(9), None);
        assert_eq!(ActionLabel::default(), ActionLabel::Hover);
    }
}
