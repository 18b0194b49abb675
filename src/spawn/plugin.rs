// src/spawn/plugin.rs
//! Spawn stack wiring (glue).
//! - Registry asset/loader
//! - Seeded RNG + settings
//! - Spawner ticking, lifetime timeouts, trigger handling, delayed returns

use bevy::ecs::event::EventCursor;
use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::core::{SpawnAnchor, TemplateId};
use super::lifecycle::{should_return, Spawned, TriggerKind};
use super::pool::{InstanceHost, PoolRegistry};
use super::registry::{TemplateRegistry, TemplateRegistryAssetPlugin};
use super::scheduler::{SpawnContext, Spawner, SpawnerState};

/// Configure where the template manifest lives and the spawn seed.
#[derive(Resource, Clone)]
pub struct SpawnSettings {
    pub registry_path: String,
    pub seed: u64,
}
impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            registry_path: "spawn/collectibles.spawn.ron".to_string(),
            seed: 1337,
        }
    }
}

/// All spawn-side randomness flows through this; changing the seed
/// reshuffles every roll reproducibly.
#[derive(Resource)]
pub struct SpawnRng(pub ChaCha8Rng);

/// Handle to the loaded TemplateRegistry asset.
#[derive(Resource, Default)]
pub struct TemplateRegistryHandle(pub Handle<TemplateRegistry>);

// ---------- Events ----------

/// An instance left the pool through a spawner.
#[derive(Event, Clone, Copy, Debug)]
pub struct SpawnedEvent {
    pub spawner: Entity,
    pub instance: Entity,
}

/// Something happened to a leased instance; game systems raise these and
/// may also observe them.
#[derive(Event, Clone, Copy, Debug)]
pub struct TriggerEvent {
    pub instance: Entity,
    pub kind: TriggerKind,
    pub instigator: Option<Entity>,
}

/// An instance went back to (or past) its pool.
#[derive(Event, Clone, Copy, Debug)]
pub struct ReleasedEvent {
    pub instance: Entity,
}

// ---------- Delayed returns ----------

struct PendingReturn {
    instance: Entity,
    remaining: f32,
}

/// Frame-granularity countdowns for "return this in N seconds". Entries
/// whose instance died in the meantime are silently dropped.
#[derive(Resource, Default)]
pub struct PendingReturns {
    items: Vec<PendingReturn>,
}

impl PendingReturns {
    pub fn push(&mut self, instance: Entity, delay: f32) {
        self.items.push(PendingReturn { instance, remaining: delay.max(0.0) });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------- Host over the ECS world ----------

/// `InstanceHost` backed by the live world: instances are entities with
/// `Name`, `Spawned`, `Transform` and `Visibility`; "active" maps to
/// visibility plus the `Spawned` age/expired state.
pub struct WorldHost<'w> {
    pub world: &'w mut World,
}

impl InstanceHost for WorldHost<'_> {
    fn create(&mut self, template: TemplateId, registry: &TemplateRegistry) -> Entity {
        match registry.get(template) {
            Some(def) => self
                .world
                .spawn((
                    Name::new(def.name.clone()),
                    Spawned::from_def(template, def),
                    Transform::default(),
                    Visibility::Hidden,
                ))
                .id(),
            None => {
                warn!("creating instance for unknown template {template:?}");
                self.world.spawn((Transform::default(), Visibility::Hidden)).id()
            }
        }
    }

    fn destroy(&mut self, instance: Entity) {
        if self.world.get_entity(instance).is_ok() {
            self.world.despawn(instance);
        }
    }

    fn set_active(&mut self, instance: Entity, active: bool) {
        if let Some(mut vis) = self.world.get_mut::<Visibility>(instance) {
            *vis = if active { Visibility::Inherited } else { Visibility::Hidden };
        }
        if let Some(mut spawned) = self.world.get_mut::<Spawned>(instance) {
            if active {
                spawned.reset();
            } else {
                spawned.expired = true;
            }
        }
    }

    fn set_transform(&mut self, instance: Entity, translation: Vec3, rotation: Quat) {
        if let Some(mut transform) = self.world.get_mut::<Transform>(instance) {
            transform.translation = translation;
            transform.rotation = rotation;
        }
    }

    fn is_alive(&self, instance: Entity) -> bool {
        self.world.get_entity(instance).is_ok()
    }
}

// ---------- Plugins ----------

pub struct SpawnCorePlugin;
impl Plugin for SpawnCorePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SpawnSettings>()
            .init_resource::<TemplateRegistryHandle>()
            .init_resource::<PoolRegistry>()
            .init_resource::<PendingReturns>()
            .add_event::<SpawnedEvent>()
            .add_event::<TriggerEvent>()
            .add_event::<ReleasedEvent>()
            .add_systems(Startup, (init_rng_from_settings, load_registry))
            .add_systems(Update, monitor_registry_ready)
            .add_systems(Update, tick_spawners)
            .add_systems(Update, tick_lifetimes.after(tick_spawners))
            .add_systems(Update, return_triggered.after(tick_lifetimes))
            .add_systems(Update, drain_pending_returns.after(return_triggered))
            .add_systems(Update, prune_released.after(drain_pending_returns));
    }
}

pub struct SpawnStackPlugin;
impl Plugin for SpawnStackPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(TemplateRegistryAssetPlugin) // asset + loader
            .add_plugins(SpawnCorePlugin); // pools + spawners + lifecycle
    }
}

// ---------- Startup ----------

fn init_rng_from_settings(mut commands: Commands, settings: Res<SpawnSettings>) {
    commands.insert_resource(SpawnRng(ChaCha8Rng::seed_from_u64(settings.seed)));
}

/// Startup: request loading the template manifest, store handle.
fn load_registry(
    mut handle_res: ResMut<TemplateRegistryHandle>,
    settings: Res<SpawnSettings>,
    assets: Res<AssetServer>,
) {
    if handle_res.0.is_strong() {
        return;
    }
    let h: Handle<TemplateRegistry> = assets.load(settings.registry_path.as_str());
    handle_res.0 = h;
    info!(
        "Spawn: loading templates from '{}', seed={}",
        settings.registry_path, settings.seed
    );
}

/// Update: log once when the registry becomes available.
fn monitor_registry_ready(
    handle_res: Res<TemplateRegistryHandle>,
    registries: Res<Assets<TemplateRegistry>>,
    mut logged: Local<bool>,
) {
    if *logged {
        return;
    }
    if let Some(reg) = registries.get(&handle_res.0) {
        *logged = true;
        info!("Spawn: registry ready with {} template(s)", reg.templates.len());
    }
}

// ---------- Per-frame work ----------

/// Drive every spawner: late-initialize once the registry is ready, then
/// advance its timers against this frame's delta.
pub fn tick_spawners(world: &mut World) {
    let dt = world.resource::<Time>().delta_secs();
    let handle = world.resource::<TemplateRegistryHandle>().0.clone();

    world.resource_scope(|world, mut pools: Mut<PoolRegistry>| {
        world.resource_scope(|world, mut rng: Mut<SpawnRng>| {
            world.resource_scope(|world, registries: Mut<Assets<TemplateRegistry>>| {
                let Some(registry) = registries.get(&handle) else { return };

                let spawners: Vec<Entity> = world
                    .query_filtered::<Entity, With<Spawner>>()
                    .iter(world)
                    .collect();

                for entity in spawners {
                    let origin = world
                        .get::<Transform>(entity)
                        .map(SpawnAnchor::from_transform)
                        .unwrap_or(SpawnAnchor::at(Vec3::ZERO));
                    let Some(mut spawner) = world.entity_mut(entity).take::<Spawner>() else {
                        continue;
                    };

                    let mut host = WorldHost { world };
                    let mut ctx = SpawnContext {
                        pools: &mut pools,
                        registry,
                        host: &mut host,
                        rng: &mut rng.0,
                    };

                    let mut spawned = Vec::new();
                    if spawner.state() == SpawnerState::Uninitialized {
                        match spawner.init(origin, &mut ctx) {
                            Ok(initial) => spawned = initial,
                            Err(e) => warn!("spawner {entity:?} failed to initialize: {e}"),
                        }
                    }
                    spawned.extend(spawner.tick(dt, origin, &mut ctx));

                    world.entity_mut(entity).insert(spawner);
                    for instance in spawned {
                        world.send_event(SpawnedEvent { spawner: entity, instance });
                    }
                }
            });
        });
    });
}

/// Age visible instances and raise timeout triggers.
pub fn tick_lifetimes(
    time: Res<Time>,
    mut instances: Query<(Entity, &mut Spawned, &Visibility)>,
    mut triggers: EventWriter<TriggerEvent>,
) {
    for (entity, mut spawned, visibility) in &mut instances {
        if spawned.expired || *visibility == Visibility::Hidden {
            continue;
        }
        spawned.age += time.delta_secs();
        if spawned.timed_out() {
            // Flag first so a slow return cannot re-fire the timeout.
            spawned.expired = true;
            triggers.write(TriggerEvent {
                instance: entity,
                kind: TriggerKind::Timeout,
                instigator: None,
            });
        }
    }
}

/// Apply the return-to-pool decision for every trigger raised this frame.
pub fn return_triggered(world: &mut World, mut cursor: Local<EventCursor<TriggerEvent>>) {
    let events: Vec<TriggerEvent> = {
        let events = world.resource::<Events<TriggerEvent>>();
        cursor.read(events).copied().collect()
    };
    if events.is_empty() {
        return;
    }

    let mut to_release = Vec::new();
    for ev in events {
        let Some(spawned) = world.get::<Spawned>(ev.instance) else { continue };
        if should_return(ev.kind, spawned) {
            to_release.push(ev.instance);
        }
    }

    let mut released = Vec::new();
    world.resource_scope(|world, mut pools: Mut<PoolRegistry>| {
        let mut host = WorldHost { world };
        for instance in to_release {
            // A trigger can arrive a frame late, after something else
            // already parked the instance. Skip those quietly.
            if pools.is_leased(instance) {
                pools.release(&mut host, instance);
                released.push(instance);
            } else {
                debug!("trigger for {instance:?} arrived after it was returned");
            }
        }
    });
    for instance in released {
        world.send_event(ReleasedEvent { instance });
    }
}

/// Tick down delayed returns; a handle that died in the meantime simply
/// drops off the queue.
pub fn drain_pending_returns(world: &mut World) {
    let dt = world.resource::<Time>().delta_secs();
    let due: Vec<Entity> = {
        let mut pending = world.resource_mut::<PendingReturns>();
        let mut due = Vec::new();
        pending.items.retain_mut(|item| {
            item.remaining -= dt;
            if item.remaining <= 0.0 {
                due.push(item.instance);
                false
            } else {
                true
            }
        });
        due
    };
    if due.is_empty() {
        return;
    }

    let mut released = Vec::new();
    world.resource_scope(|world, mut pools: Mut<PoolRegistry>| {
        let mut host = WorldHost { world };
        for instance in due {
            if host.is_alive(instance) {
                pools.release(&mut host, instance);
                released.push(instance);
            } else {
                debug!("delayed return skipped: {instance:?} is gone");
            }
        }
    });
    for instance in released {
        world.send_event(ReleasedEvent { instance });
    }
}

/// Keep spawner active-sets in sync with pool releases.
pub fn prune_released(
    mut released: EventReader<ReleasedEvent>,
    mut spawners: Query<&mut Spawner>,
) {
    for ev in released.read() {
        for mut spawner in &mut spawners {
            spawner.notify_released(ev.instance);
        }
    }
}
