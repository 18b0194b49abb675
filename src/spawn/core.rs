// src/spawn/core.rs
//! Core types for pooled, weighted spawning.
//! Keep this file dependency-light; it should compile before the pool/scheduler impls.

use bevy::prelude::*; // Vec3, Quat
use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------- Ids & weighted sets ----------

/// Index of a template in the registry (stable during a session).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub u32);

/// One entry of a weighted set: a template plus its roulette weight.
/// Weight 0 keeps the entry in the set but makes it unreachable by selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DropEntry {
    pub template: TemplateId,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl DropEntry {
    pub const fn new(template: TemplateId, weight: f32) -> Self {
        Self { template, weight }
    }

    /// Single-template set at full weight, used by the plain acquire path.
    pub const fn solo(template: TemplateId) -> Self {
        Self { template, weight: 100.0 }
    }
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SpawnError {
    #[error("a pool already exists for key '{0}'")]
    DuplicatePool(String),
    #[error("weighted set has no selectable entry (total weight {total})")]
    NoValidSelection { total: f32 },
    #[error("unknown template id {0:?}")]
    UnknownTemplate(TemplateId),
    #[error("cannot create a pool from an empty entry set")]
    EmptyEntrySet,
}

// ---------- Weighted (roulette) selection ----------

/// Sum of weights, clamping negatives to zero.
pub fn total_weight(entries: &[DropEntry]) -> f32 {
    entries.iter().map(|e| e.weight.max(0.0)).sum()
}

/// Roulette pick: draw `r` in `[0, Σw)` and walk entries in declaration order.
pub fn select_weighted(entries: &[DropEntry], rng: &mut impl Rng) -> Result<TemplateId, SpawnError> {
    let total = total_weight(entries);
    if total <= 0.0 {
        return Err(SpawnError::NoValidSelection { total });
    }
    let roll = rng.random_range(0.0..total);
    select_at(entries, roll)
}

/// Cumulative walk for a known roll. Entries with weight <= 0 are skipped,
/// so a zero-weight entry can never match, not even at `roll == 0`.
/// The trailing fallback covers the floating-point boundary `roll == Σw`.
pub fn select_at(entries: &[DropEntry], roll: f32) -> Result<TemplateId, SpawnError> {
    let mut acc = 0.0;
    for entry in entries {
        if entry.weight <= 0.0 {
            continue;
        }
        acc += entry.weight;
        if roll <= acc {
            return Ok(entry.template);
        }
    }
    entries
        .iter()
        .find(|e| e.weight > 0.0)
        .map(|e| e.template)
        .ok_or(SpawnError::NoValidSelection { total: acc })
}

// ---------- Interval policies ----------

/// How a spawn timer resolves its next wait. Random variants are sampled
/// freshly on every evaluation, never cached.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IntervalPolicy {
    Fixed { seconds: f32 },
    RandomRange { min: f32, max: f32 },
    RandomDiscrete { choices: Vec<f32> },
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self::Fixed { seconds: 1.0 }
    }
}

impl IntervalPolicy {
    pub fn resolve(&self, rng: &mut impl Rng) -> f32 {
        match self {
            Self::Fixed { seconds } => *seconds,
            Self::RandomRange { min, max } => {
                if max > min {
                    rng.random_range(*min..*max)
                } else {
                    *min
                }
            }
            Self::RandomDiscrete { choices } => {
                if choices.is_empty() {
                    // Nothing to sample; the timer never fires.
                    f32::INFINITY
                } else {
                    choices[rng.random_range(0..choices.len())]
                }
            }
        }
    }
}

// ---------- Anchors & areas ----------

/// A spawn location: position + orientation, detached from any scene graph.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpawnAnchor {
    pub translation: Vec3,
    #[serde(default = "default_rotation")]
    pub rotation: Quat,
}

fn default_rotation() -> Quat {
    Quat::IDENTITY
}

impl SpawnAnchor {
    pub const fn at(translation: Vec3) -> Self {
        Self { translation, rotation: Quat::IDENTITY }
    }

    pub fn from_transform(transform: &Transform) -> Self {
        Self { translation: transform.translation, rotation: transform.rotation }
    }
}

/// Axis-aligned spawn volume; sampling is uniform per axis over the box.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpawnBounds {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl SpawnBounds {
    pub fn random_point(&self, rng: &mut impl Rng) -> Vec3 {
        let h = self.half_extents.abs();
        let x = if h.x > 0.0 { rng.random_range(-h.x..h.x) } else { 0.0 };
        let y = if h.y > 0.0 { rng.random_range(-h.y..h.y) } else { 0.0 };
        let z = if h.z > 0.0 { rng.random_range(-h.z..h.z) } else { 0.0 };
        self.center + Vec3::new(x, y, z)
    }

    pub fn contains(&self, p: Vec3) -> bool {
        let h = self.half_extents.abs();
        (p - self.center).abs().cmple(h).all()
    }
}
