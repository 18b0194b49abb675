//! lootfield: pooled spawning for Bevy games.
//!
//! Two pieces do the work: a [`spawn::pool::PoolRegistry`] that recycles
//! instances per template (weighted "drop" selection included), and a
//! [`spawn::scheduler::Spawner`] that decides when and where spawn
//! events fire. [`spawn::SpawnStackPlugin`] wires both into an app.

pub mod spawn;

pub use spawn::core::{
    DropEntry, IntervalPolicy, SpawnAnchor, SpawnBounds, SpawnError, TemplateId,
};
pub use spawn::lifecycle::{Spawned, TriggerKind};
pub use spawn::plugin::{
    PendingReturns, ReleasedEvent, SpawnRng, SpawnSettings, SpawnedEvent, TemplateRegistryHandle,
    TriggerEvent, WorldHost,
};
pub use spawn::pool::{InstanceHost, PoolKey, PoolRegistry, PoolSeed};
pub use spawn::registry::{TemplateDef, TemplateRegistry};
pub use spawn::scheduler::{
    ActiveLimit, SpawnMode, SpawnPointData, Spawner, SpawnerConfig, SpawnerState,
};
pub use spawn::SpawnStackPlugin;
