// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor abstraction.
//!
//! The collector reads depth, pose and target independently each capture;
//! a failure in one field never aborts the others.

use crate::sample::{DepthError, DepthMap, Direction, Pose, NO_TARGET_DISTANCE, ZERO_DIRECTION};
use crate::target::relative_direction;
use thiserror::Error;

/// Per-field capture errors.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid depth image: {0}")]
    Depth(#[from] DepthError),

    #[error("Capture failed: {0}")]
    Capture(String),
}

/// Distance and direction to the tracked target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetReading {
    /// `<= 0` means no target visible.
    pub distance: f32,
    pub direction: Direction,
}

impl TargetReading {
    /// Reading for "no target visible".
    pub const NONE: TargetReading = TargetReading {
        distance: NO_TARGET_DISTANCE,
        direction: ZERO_DIRECTION,
    };

    pub fn is_visible(&self) -> bool {
        self.distance > 0.0
    }
}

/// Source of depth images, poses and target readings.
///
/// Called from the producer thread only.
pub trait SensorSource {
    fn depth(&mut self) -> Result<DepthMap, SensorError>;

    fn pose(&mut self) -> Result<Pose, SensorError>;

    fn target(&mut self) -> Result<TargetReading, SensorError>;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn depth(&mut self) -> Result<DepthMap, SensorError> {
        (**self).depth()
    }

    fn pose(&mut self) -> Result<Pose, SensorError> {
        (**self).pose()
    }

    fn target(&mut self) -> Result<TargetReading, SensorError> {
        (**self).target()
    }
}

/// Deterministic stand-in for a simulator.
///
/// The drone orbits the origin at constant altitude, facing along its
/// path, while a fixed target sits inside the orbit. Depth images are a
/// noisy radial gradient. `step()` advances the orbit by one tick.
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    width: u32,
    height: u32,
    radius: f32,
    altitude: f32,
    angular_speed: f32,
    /// Targets farther than this are reported as not visible.
    visibility_range: f32,
    target: [f32; 3],
    angle: f32,
    rng: fastrand::Rng,
}

impl SyntheticSensor {
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        Self {
            width,
            height,
            radius: 10.0,
            altitude: 3.0,
            angular_speed: 0.01,
            visibility_range: 15.0,
            target: [4.0, 0.0, 0.0],
            angle: 0.0,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Move the target.
    pub fn with_target(mut self, position: [f32; 3]) -> Self {
        self.target = position;
        self
    }

    /// Set how far the target can be seen.
    pub fn with_visibility_range(mut self, range: f32) -> Self {
        self.visibility_range = range;
        self
    }

    /// Advance the orbit by one tick.
    pub fn step(&mut self) {
        self.angle = (self.angle + self.angular_speed) % std::f32::consts::TAU;
    }

    fn position(&self) -> [f32; 3] {
        [
            self.radius * self.angle.cos(),
            self.radius * self.angle.sin(),
            self.altitude,
        ]
    }

    fn orientation(&self) -> [f32; 3] {
        // Tangent heading of a counter-clockwise orbit.
        [0.0, 0.0, self.angle + std::f32::consts::FRAC_PI_2]
    }
}

impl SensorSource for SyntheticSensor {
    fn depth(&mut self) -> Result<DepthMap, SensorError> {
        let (w, h) = (self.width as f32, self.height as f32);
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in 0..self.height {
            for col in 0..self.width {
                let dx = (col as f32 - w / 2.0) / w;
                let dy = (row as f32 - h / 2.0) / h;
                let base = 5.0 + 20.0 * (dx * dx + dy * dy).sqrt();
                data.push(base + self.rng.f32() * 0.05);
            }
        }
        Ok(DepthMap::new(self.width, self.height, data)?)
    }

    fn pose(&mut self) -> Result<Pose, SensorError> {
        let [x, y, z] = self.position();
        let [roll, pitch, yaw] = self.orientation();
        Ok([x, y, z, roll, pitch, yaw])
    }

    fn target(&mut self) -> Result<TargetReading, SensorError> {
        let (direction, distance) =
            relative_direction(self.position(), self.orientation(), self.target);
        if distance > self.visibility_range {
            return Ok(TargetReading::NONE);
        }
        Ok(TargetReading {
            distance,
            direction,
        })
    }
}
