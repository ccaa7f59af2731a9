use serde::{Deserialize, Serialize};

/// Point on the horizontal (x, z) plane.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, z: 0.0 };

    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    /// Euclidean distance on the (x, z) plane.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.z - other.z)
    }
}
