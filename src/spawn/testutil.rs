// src/spawn/testutil.rs
//! Shared fixtures for the unit tests: a mock instance host backed by a
//! bare ECS world, registry builders, and a fixed-seed RNG.

use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use super::core::TemplateId;
use super::pool::InstanceHost;
use super::registry::{TemplateDef, TemplateRegistry};

pub struct MockHost {
    pub world: World,
    pub created: usize,
    pub destroyed: Vec<Entity>,
    pub active: HashMap<Entity, bool>,
    pub transforms: HashMap<Entity, (Vec3, Quat)>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            created: 0,
            destroyed: Vec::new(),
            active: HashMap::new(),
            transforms: HashMap::new(),
        }
    }
}

impl InstanceHost for MockHost {
    fn create(&mut self, _template: TemplateId, _registry: &TemplateRegistry) -> Entity {
        self.created += 1;
        let e = self.world.spawn_empty().id();
        self.active.insert(e, false);
        e
    }
    fn destroy(&mut self, instance: Entity) {
        self.world.despawn(instance);
        self.destroyed.push(instance);
        self.active.remove(&instance);
    }
    fn set_active(&mut self, instance: Entity, active: bool) {
        self.active.insert(instance, active);
    }
    fn set_transform(&mut self, instance: Entity, translation: Vec3, rotation: Quat) {
        self.transforms.insert(instance, (translation, rotation));
    }
    fn is_alive(&self, instance: Entity) -> bool {
        self.world.get_entity(instance).is_ok()
    }
}

pub fn def(name: &str) -> TemplateDef {
    TemplateDef {
        name: name.to_string(),
        category: None,
        lifetime: 30.0,
        return_on_player_trigger: true,
        return_on_other_trigger: true,
    }
}

pub fn registry(names: &[&str]) -> TemplateRegistry {
    TemplateRegistry::from_defs(names.iter().map(|n| def(n)).collect()).unwrap()
}

pub fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}
