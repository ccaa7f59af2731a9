//! Seeded spawn placement.
//!
//! Runs only while generating `CharacterSpawned` transactions. The output is
//! written into the payload, so replay never calls into this module.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use sagalog_core::CharacterInstanceId;

use crate::position::Position;

/// Ring geometry around the spawn center.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRing {
    pub radius: f64,
    /// Maximum angular jitter per character, in radians.
    pub jitter_radians: f64,
}

impl Default for SpawnRing {
    fn default() -> Self {
        Self {
            radius: 5.0,
            jitter_radians: 0.2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpawnPlacement {
    pub character_instance_id: CharacterInstanceId,
    pub position: Position,
}

/// Place `count` characters on `ring` around `center`, driven only by `seed`.
///
/// Characters are spaced evenly from a seeded base angle, each nudged by at
/// most a quarter of the spacing so neighbours never swap order. Instance ids
/// are drawn from the same generator, after all angles.
pub fn place_spawns(seed: u64, center: Position, count: usize, ring: SpawnRing) -> Vec<SpawnPlacement> {
    if count == 0 {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let step = TAU / count as f64;
    let max_jitter = ring.jitter_radians.abs().min(step / 4.0);
    let base: f64 = rng.gen_range(0.0..TAU);

    let angles: Vec<f64> = (0..count)
        .map(|i| {
            let jitter = if max_jitter > 0.0 {
                rng.gen_range(-max_jitter..=max_jitter)
            } else {
                0.0
            };
            base + step * i as f64 + jitter
        })
        .collect();

    angles
        .into_iter()
        .map(|angle| {
            let bytes: [u8; 16] = rng.r#gen();
            SpawnPlacement {
                character_instance_id: CharacterInstanceId::from_uuid(
                    uuid::Builder::from_random_bytes(bytes).into_uuid(),
                ),
                position: Position::new(
                    center.x + ring.radius * angle.cos(),
                    center.z + ring.radius * angle.sin(),
                ),
            }
        })
        .collect()
}
