pub mod core;
pub mod registry;
pub mod pool;
pub mod scheduler;
pub mod lifecycle;
pub mod plugin;

#[cfg(test)]
pub(crate) mod testutil;

pub use plugin::SpawnStackPlugin;
