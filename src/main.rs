use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use std::time::Duration;

use lootfield::{
    ActiveLimit, DropEntry, IntervalPolicy, PendingReturns, ReleasedEvent, SpawnAnchor,
    SpawnMode, SpawnPointData, SpawnSettings, SpawnStackPlugin, Spawned, SpawnedEvent, Spawner,
    SpawnerConfig, TemplateRegistry, TemplateRegistryHandle, TriggerEvent, TriggerKind,
};

// Headless demo: three weighted spawn points dropping collectibles from a
// shared pool, with a stand-in "player" that grabs anything older than a
// few seconds so instances visibly recycle.

fn main() {
    App::new()
        .add_plugins((
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 60.0,
            ))),
            bevy::asset::AssetPlugin::default(),
            bevy::log::LogPlugin::default(),
        ))
        .add_plugins(SpawnStackPlugin)
        .insert_resource(SpawnSettings {
            registry_path: "spawn/collectibles.spawn.ron".to_string(),
            seed: 1337,
        })
        .add_systems(
            Update,
            (setup_spawner, log_spawns, grab_old_loot, sweep_stale_medkits, log_releases),
        )
        .run();
}

/// Build the demo spawner once the template registry has loaded.
fn setup_spawner(
    mut commands: Commands,
    handle: Res<TemplateRegistryHandle>,
    registries: Res<Assets<TemplateRegistry>>,
    mut done: Local<bool>,
) {
    if *done {
        return;
    }
    let Some(reg) = registries.get(&handle.0) else { return };

    let mut entries = Vec::new();
    for (name, weight) in [("Coin", 80.0), ("Gem", 15.0), ("Medkit", 5.0)] {
        match reg.index_of(name) {
            Some(id) => entries.push(DropEntry::new(id, weight)),
            None => warn!("manifest is missing template '{name}'"),
        }
    }

    let points = [-6.0, 0.0, 6.0]
        .into_iter()
        .enumerate()
        .map(|(i, x)| SpawnPointData {
            anchor: SpawnAnchor::at(Vec3::new(x, 0.0, 0.0)),
            weight: 1.0 + i as f32,
            interval: IntervalPolicy::RandomRange { min: 0.8, max: 2.0 },
        })
        .collect();

    commands.spawn((
        Transform::default(),
        Spawner::new(SpawnerConfig {
            entries,
            mode: SpawnMode::MultiplePoints { points },
            global_interval: IntervalPolicy::Fixed { seconds: 1.0 },
            min_count: 1,
            max_count: 3,
            use_random_count: true,
            initial_pool_size: 8,
            pool_expandable: true,
            spawn_on_init: true,
            active_limit: ActiveLimit { enabled: true, max: 12, min: 4, check_interval: 2.0 },
        }),
    ));
    *done = true;
    info!("demo spawner armed");
}

fn log_spawns(mut events: EventReader<SpawnedEvent>, instances: Query<(&Name, &Transform)>) {
    for ev in events.read() {
        if let Ok((name, transform)) = instances.get(ev.instance) {
            info!("spawned '{}' at {}", name.as_str(), transform.translation);
        }
    }
}

/// Stand-in for player pickup: collect score items that have sat around
/// for three seconds.
fn grab_old_loot(instances: Query<(Entity, &Spawned)>, mut triggers: EventWriter<TriggerEvent>) {
    for (entity, spawned) in &instances {
        if spawned.category.as_deref() == Some("score") && !spawned.expired && spawned.age > 3.0 {
            triggers.write(TriggerEvent {
                instance: entity,
                kind: TriggerKind::PlayerCollected,
                instigator: None,
            });
        }
    }
}

/// Medkits nobody grabbed get a one-second delayed return instead of an
/// immediate trigger.
fn sweep_stale_medkits(
    mut instances: Query<(Entity, &mut Spawned)>,
    mut pending: ResMut<PendingReturns>,
) {
    for (entity, mut spawned) in &mut instances {
        if spawned.category.as_deref() == Some("health") && !spawned.expired && spawned.age > 5.0 {
            // Hand the instance to the countdown queue; flagging it
            // expired stops the lifetime clock and a second sweep.
            spawned.expired = true;
            pending.push(entity, 1.0);
        }
    }
}

fn log_releases(mut events: EventReader<ReleasedEvent>) {
    for ev in events.read() {
        debug!("recycled {:?}", ev.instance);
    }
}
