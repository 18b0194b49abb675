// src/spawn/lifecycle.rs
//! Per-instance lifecycle state and the return-to-pool decision table.

use bevy::prelude::*;

use super::core::TemplateId;
use super::registry::TemplateDef;

/// Marker on every pooled instance. Reset on each (re)activation.
#[derive(Component, Clone, Debug)]
pub struct Spawned {
    /// Which template this came from.
    pub template: TemplateId,
    /// Category hint copied from the template (e.g., "health", "score").
    pub category: Option<String>,
    /// Seconds before a timeout trigger fires. Non-finite or <= 0 disables it.
    pub lifetime: f32,
    pub return_on_player_trigger: bool,
    pub return_on_other_trigger: bool,
    /// Seconds since last activation.
    pub age: f32,
    /// True while the instance sits in a free queue (or after a trigger
    /// already started its return). Expired instances ignore further
    /// triggers and do not age.
    pub expired: bool,
}

impl Spawned {
    pub fn from_def(template: TemplateId, def: &TemplateDef) -> Self {
        Self {
            template,
            category: def.category.clone(),
            lifetime: def.lifetime,
            return_on_player_trigger: def.return_on_player_trigger,
            return_on_other_trigger: def.return_on_other_trigger,
            age: 0.0,
            // Instances are created parked in the pool.
            expired: true,
        }
    }

    pub fn reset(&mut self) {
        self.age = 0.0;
        self.expired = false;
    }

    pub fn timed_out(&self) -> bool {
        self.lifetime > 0.0 && self.lifetime.is_finite() && self.age >= self.lifetime
    }
}

/// What happened to a leased instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    PlayerCollected,
    OtherCollected,
    Timeout,
    Destroyed,
    Custom,
}

/// Whether a trigger sends the instance back to its pool. Player/other
/// collection is gated by the template flags; timeout and destruction
/// always return; custom triggers never return automatically.
pub fn should_return(kind: TriggerKind, spawned: &Spawned) -> bool {
    match kind {
        TriggerKind::PlayerCollected => spawned.return_on_player_trigger,
        TriggerKind::OtherCollected => spawned.return_on_other_trigger,
        TriggerKind::Timeout | TriggerKind::Destroyed => true,
        TriggerKind::Custom => false,
    }
}
