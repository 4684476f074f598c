//! Geometric boundary types shared with the simulator's JSON surface.

use serde::{Deserialize, Serialize};

/// 3-component vector, serialized as `{"x": ..., "y": ..., "z": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Position plus Euler rotation in degrees, the simulator's pose format.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vector,
    pub rotation: Vector,
}

/// Axis-aligned bounds in an agent's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vector,
    pub max: Vector,
}

/// Ambient weather mix, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherState {
    pub rain: f64,
    pub fog: f64,
    pub wetness: f64,
}

/// One hit reported by `simulator/raycast`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RaycastHit {
    pub distance: f64,
    pub point: Vector,
    pub normal: Vector,
}
