//! Pose types and heading normalization
//!
//! Stations are taught by driving the cart around, so their stored headings
//! drift a few degrees from the cardinal directions. Snapping them to 0°,
//! 90°, 180° or -90° makes repeated navigation to the same station land on
//! the same heading. Headings that fall between buckets are passed through.

use crate::config::NormalizerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// Planar pose in the `map` frame, serialized as a `geometry_msgs/Pose`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

/// Canonical heading a stored orientation was snapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    Forward,
    Left,
    Reverse,
    Right,
}

impl Heading {
    pub fn degrees(self) -> f64 {
        match self {
            Heading::Forward => 0.0,
            Heading::Left => 90.0,
            Heading::Reverse => 180.0,
            Heading::Right => -90.0,
        }
    }
}

/// Pure-yaw quaternion for an angle in degrees
pub fn quaternion_from_yaw(degrees: f64) -> Quaternion {
    let half = degrees.to_radians() / 2.0;
    Quaternion {
        x: 0.0,
        y: 0.0,
        z: half.sin(),
        w: half.cos(),
    }
}

/// Yaw in degrees of a pure-yaw quaternion given by its z/w components
pub fn yaw_degrees(z: f64, w: f64) -> f64 {
    (2.0 * z.atan2(w)).to_degrees()
}

#[derive(Debug, Clone, Default)]
pub struct PoseNormalizer {
    buckets: NormalizerConfig,
}

impl PoseNormalizer {
    pub fn new(buckets: NormalizerConfig) -> Self {
        Self { buckets }
    }

    /// Bucket a yaw angle, `None` when it falls between buckets
    pub fn classify(&self, yaw: f64) -> Option<Heading> {
        let b = &self.buckets;
        if (-b.forward_tolerance..=b.forward_tolerance).contains(&yaw) {
            Some(Heading::Forward)
        } else if (b.side_min..=b.side_max).contains(&yaw) {
            Some(Heading::Left)
        } else if yaw >= b.reverse_min || yaw <= -b.reverse_min {
            Some(Heading::Reverse)
        } else if (-b.side_max..=-b.side_min).contains(&yaw) {
            Some(Heading::Right)
        } else {
            None
        }
    }

    /// Snap a stored orientation to a cardinal heading
    pub fn normalize_orientation(&self, z: f64, w: f64) -> Quaternion {
        match self.classify(yaw_degrees(z, w)) {
            Some(heading) => quaternion_from_yaw(heading.degrees()),
            None => Quaternion { x: 0.0, y: 0.0, z, w },
        }
    }

    /// Build a navigation pose from a stored position and raw orientation
    pub fn normalize(&self, x: f64, y: f64, z: f64, w: f64) -> Pose {
        Pose {
            position: Point { x, y, z: 0.0 },
            orientation: self.normalize_orientation(z, w),
        }
    }
}
