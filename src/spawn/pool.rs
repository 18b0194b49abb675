// src/spawn/pool.rs
//! Pool registry: recycled instances keyed by template, with weighted
//! acquisition. Instances are leased out and reclaimed; creation and
//! destruction go through the host seam so the registry itself never
//! touches rendering or scene state.

use bevy::prelude::*;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use super::core::{select_weighted, DropEntry, SpawnError, TemplateId};
use super::registry::TemplateRegistry;

/// Initial size for pools created implicitly by an acquire against a
/// missing key.
pub const ON_DEMAND_POOL_SIZE: usize = 5;

// ---------- Host seam ----------

/// Instantiation/destruction service supplied by the surrounding engine.
/// The registry only toggles activity and transforms; everything else
/// (visuals, physics, game components) belongs to the host.
pub trait InstanceHost {
    fn create(&mut self, template: TemplateId, registry: &TemplateRegistry) -> Entity;
    fn destroy(&mut self, instance: Entity);
    fn set_active(&mut self, instance: Entity, active: bool);
    fn set_transform(&mut self, instance: Entity, translation: Vec3, rotation: Quat);
    fn is_alive(&self, instance: Entity) -> bool;
}

/// One-shot callback invoked at release, before the instance re-enters
/// its free queue.
pub type ReleaseCallback = Box<dyn FnOnce(Entity) + Send + Sync>;

// ---------- Keys & slots ----------

/// Canonical pool identity: distinct template names, sorted, joined
/// with `+` (the loader reserves that character, so joined keys cannot
/// collide with a literal name). Sorting keeps `[A, B]` and `[B, A]`
/// from silently fragmenting recycling across two equivalent pools.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey(pub String);

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct PoolSlot {
    free: VecDeque<Entity>,
    total_created: usize,
}

struct DropPool {
    slots: HashMap<TemplateId, PoolSlot>,
    expandable: bool,
}

struct InstanceMeta {
    template: TemplateId,
    pool: PoolKey,
    leased: bool,
    on_release: Option<ReleaseCallback>,
}

/// Seed data for preloading several pools up front.
#[derive(Clone, Debug)]
pub struct PoolSeed {
    pub entries: Vec<DropEntry>,
    pub size: usize,
    pub expandable: bool,
}

// ---------- Registry ----------

#[derive(Resource, Default)]
pub struct PoolRegistry {
    pools: HashMap<PoolKey, DropPool>,
    instances: HashMap<Entity, InstanceMeta>,
}

impl PoolRegistry {
    /// Canonical key for a weighted set. Fails on an empty set or a
    /// template id the registry does not know.
    pub fn pool_key(
        entries: &[DropEntry],
        registry: &TemplateRegistry,
    ) -> Result<PoolKey, SpawnError> {
        if entries.is_empty() {
            return Err(SpawnError::EmptyEntrySet);
        }
        let mut names = Vec::with_capacity(entries.len());
        for entry in entries {
            let def = registry
                .get(entry.template)
                .ok_or(SpawnError::UnknownTemplate(entry.template))?;
            if !names.contains(&def.name.as_str()) {
                names.push(def.name.as_str());
            }
        }
        names.sort_unstable();
        Ok(PoolKey(names.join("+")))
    }

    /// Create a pool for a weighted set, pre-populating `initial_size`
    /// parked instances per distinct template. Zero-weight entries are
    /// seeded too; they stay reachable through `acquire_one`.
    pub fn create_pool(
        &mut self,
        host: &mut dyn InstanceHost,
        registry: &TemplateRegistry,
        entries: &[DropEntry],
        initial_size: usize,
        expandable: bool,
    ) -> Result<PoolKey, SpawnError> {
        let key = Self::pool_key(entries, registry)?;
        if self.pools.contains_key(&key) {
            return Err(SpawnError::DuplicatePool(key.0));
        }

        let mut pool = DropPool { slots: HashMap::new(), expandable };
        for entry in entries {
            if pool.slots.contains_key(&entry.template) {
                continue;
            }
            let mut slot = PoolSlot { free: VecDeque::with_capacity(initial_size), total_created: 0 };
            for _ in 0..initial_size {
                let instance = host.create(entry.template, registry);
                host.set_active(instance, false);
                slot.free.push_back(instance);
                slot.total_created += 1;
                self.instances.insert(
                    instance,
                    InstanceMeta {
                        template: entry.template,
                        pool: key.clone(),
                        leased: false,
                        on_release: None,
                    },
                );
            }
            pool.slots.insert(entry.template, slot);
        }

        info!(
            "pool '{}' created: {} template(s) x {} instance(s), expandable={}",
            key,
            pool.slots.len(),
            initial_size,
            expandable
        );
        self.pools.insert(key.clone(), pool);
        Ok(key)
    }

    /// Create several pools up front; duplicates and bad sets are logged
    /// and skipped rather than aborting the batch.
    pub fn preload(
        &mut self,
        host: &mut dyn InstanceHost,
        registry: &TemplateRegistry,
        seeds: &[PoolSeed],
    ) {
        for seed in seeds {
            if let Err(e) = self.create_pool(host, registry, &seed.entries, seed.size, seed.expandable)
            {
                warn!("preload skipped a pool: {e}");
            }
        }
    }

    /// Weighted acquire: roulette-select a template from `entries`, then
    /// lease an instance from its slot. A missing pool is created on
    /// demand. `Ok(None)` means the winning slot is exhausted and the
    /// pool cannot expand; callers treat that as a normal skipped spawn.
    pub fn acquire(
        &mut self,
        host: &mut dyn InstanceHost,
        registry: &TemplateRegistry,
        entries: &[DropEntry],
        translation: Vec3,
        rotation: Quat,
        rng: &mut impl Rng,
    ) -> Result<Option<Entity>, SpawnError> {
        let key = Self::pool_key(entries, registry)?;
        if !self.pools.contains_key(&key) {
            debug!("pool '{key}' missing; creating on demand");
            self.create_pool(host, registry, entries, ON_DEMAND_POOL_SIZE, true)?;
        }

        let template = select_weighted(entries, rng)?;
        Ok(self.lease(host, registry, &key, template, translation, rotation))
    }

    /// Acquire a specific template at full weight.
    pub fn acquire_one(
        &mut self,
        host: &mut dyn InstanceHost,
        registry: &TemplateRegistry,
        template: TemplateId,
        translation: Vec3,
        rotation: Quat,
        rng: &mut impl Rng,
    ) -> Result<Option<Entity>, SpawnError> {
        self.acquire(host, registry, &[DropEntry::solo(template)], translation, rotation, rng)
    }

    fn lease(
        &mut self,
        host: &mut dyn InstanceHost,
        registry: &TemplateRegistry,
        key: &PoolKey,
        template: TemplateId,
        translation: Vec3,
        rotation: Quat,
    ) -> Option<Entity> {
        let pool = self.pools.get_mut(key)?;
        let expandable = pool.expandable;
        let slot = pool.slots.get_mut(&template)?;

        let instance = match slot.free.pop_front() {
            Some(instance) => instance,
            None if expandable => {
                let instance = host.create(template, registry);
                slot.total_created += 1;
                self.instances.insert(
                    instance,
                    InstanceMeta {
                        template,
                        pool: key.clone(),
                        leased: false,
                        on_release: None,
                    },
                );
                instance
            }
            None => {
                debug!("pool '{key}' exhausted for {template:?}; spawn skipped");
                return None;
            }
        };

        if let Some(meta) = self.instances.get_mut(&instance) {
            meta.leased = true;
        }
        host.set_transform(instance, translation, rotation);
        host.set_active(instance, true);
        Some(instance)
    }

    /// Attach a one-shot callback fired at the next release of a leased
    /// instance. Returns false (and warns) if the instance is unknown or
    /// not currently leased.
    pub fn set_release_callback(&mut self, instance: Entity, callback: ReleaseCallback) -> bool {
        match self.instances.get_mut(&instance) {
            Some(meta) if meta.leased => {
                meta.on_release = Some(callback);
                true
            }
            _ => {
                warn!("release callback refused: {instance:?} is not a leased pooled instance");
                false
            }
        }
    }

    /// Return an instance to its free queue. An instance with no pool
    /// association is destroyed instead; a double release is ignored with
    /// a logged anomaly and never enqueues twice.
    pub fn release(&mut self, host: &mut dyn InstanceHost, instance: Entity) {
        let Some(meta) = self.instances.get_mut(&instance) else {
            warn!("{instance:?} is not from a pool; destroying instead");
            host.destroy(instance);
            return;
        };
        if !meta.leased {
            warn!("double release of {instance:?} ignored");
            return;
        }

        meta.leased = false;
        let template = meta.template;
        let key = meta.pool.clone();
        if let Some(callback) = meta.on_release.take() {
            callback(instance);
        }

        if !host.is_alive(instance) {
            debug!("released {instance:?} is gone; dropping bookkeeping");
            self.instances.remove(&instance);
            return;
        }

        match self.pools.get_mut(&key).and_then(|p| p.slots.get_mut(&template)) {
            Some(slot) => {
                host.set_active(instance, false);
                slot.free.push_back(instance);
            }
            None => {
                // Pool was cleared while this instance was on lease.
                debug!("pool '{key}' no longer exists; destroying {instance:?}");
                self.instances.remove(&instance);
                host.destroy(instance);
            }
        }
    }

    /// Destroy every parked instance and drop all pools. Leased instances
    /// stay with their callers and are destroyed on release instead of
    /// re-pooled.
    pub fn clear_all(&mut self, host: &mut dyn InstanceHost) {
        let mut parked = 0usize;
        for pool in self.pools.values_mut() {
            for slot in pool.slots.values_mut() {
                while let Some(instance) = slot.free.pop_front() {
                    self.instances.remove(&instance);
                    host.destroy(instance);
                    parked += 1;
                }
            }
        }
        self.pools.clear();
        info!("cleared all pools ({parked} parked instance(s) destroyed)");
    }

    /// Parked (free) instances for a template, summed across pools.
    pub fn free_count(&self, template: TemplateId) -> usize {
        self.pools
            .values()
            .filter_map(|p| p.slots.get(&template))
            .map(|s| s.free.len())
            .sum()
    }

    /// Instances ever created for a template, summed across pools.
    pub fn created_count(&self, template: TemplateId) -> usize {
        self.pools
            .values()
            .filter_map(|p| p.slots.get(&template))
            .map(|s| s.total_created)
            .sum()
    }

    pub fn is_leased(&self, instance: Entity) -> bool {
        self.instances.get(&instance).is_some_and(|m| m.leased)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::testutil::{registry, rng, MockHost};
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fixed_pool_serves_exactly_its_size() {
        // Size 3, not expandable; the 4th acquire yields nothing.
        let reg = registry(&["Coin"]);
        let entries = [DropEntry::new(TemplateId(0), 100.0)];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools.create_pool(&mut host, &reg, &entries, 3, false).unwrap();
        assert_eq!(host.created, 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let e = pools
                .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
                .unwrap()
                .expect("pool should have a free instance");
            assert!(!seen.contains(&e), "instances must be distinct");
            seen.push(e);
        }
        let fourth = pools
            .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap();
        assert_eq!(fourth, None);
        assert_eq!(host.created, 3, "a fixed pool never grows");
    }

    #[test]
    fn expandable_pool_grows_by_one_and_keeps_the_instance() {
        let reg = registry(&["Coin"]);
        let entries = [DropEntry::new(TemplateId(0), 100.0)];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools.create_pool(&mut host, &reg, &entries, 2, true).unwrap();
        let mut leased = Vec::new();
        for _ in 0..3 {
            leased.push(
                pools
                    .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(host.created, 3, "exhaustion creates exactly one extra");
        assert_eq!(pools.created_count(TemplateId(0)), 3);

        for e in leased {
            pools.release(&mut host, e);
        }
        assert_eq!(pools.free_count(TemplateId(0)), 3, "growth is permanent");
        assert!(host.destroyed.is_empty());
    }

    #[test]
    fn release_round_trips_the_same_instance() {
        let reg = registry(&["Coin"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools
            .create_pool(&mut host, &reg, &[DropEntry::solo(TemplateId(0))], 1, false)
            .unwrap();
        let first = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        pools.release(&mut host, first);
        let second = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn free_queue_is_fifo() {
        let reg = registry(&["Coin"]);
        let entries = [DropEntry::solo(TemplateId(0))];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        fn take(
            pools: &mut PoolRegistry,
            host: &mut MockHost,
            reg: &TemplateRegistry,
            entries: &[DropEntry],
            rng: &mut ChaCha8Rng,
        ) -> Entity {
            pools
                .acquire(host, reg, entries, Vec3::ZERO, Quat::IDENTITY, rng)
                .unwrap()
                .unwrap()
        }

        pools.create_pool(&mut host, &reg, &entries, 3, false).unwrap();
        let a = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        let b = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        let c = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        pools.release(&mut host, b);
        pools.release(&mut host, a);
        pools.release(&mut host, c);
        let x = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        let y = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        let z = take(&mut pools, &mut host, &reg, &entries, &mut rng);
        assert_eq!((x, y, z), (b, a, c));
    }

    #[test]
    fn no_instance_is_leased_twice() {
        let reg = registry(&["Coin"]);
        let entries = [DropEntry::solo(TemplateId(0))];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools.create_pool(&mut host, &reg, &entries, 2, false).unwrap();
        let a = pools
            .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        let b = pools
            .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        assert_ne!(a, b);
        assert!(pools.is_leased(a) && pools.is_leased(b));
        assert_eq!(pools.free_count(TemplateId(0)), 0);

        pools.release(&mut host, a);
        assert!(!pools.is_leased(a));
        let c = pools
            .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(c, a);
        assert_eq!(pools.free_count(TemplateId(0)), 0);
    }

    #[test]
    fn double_release_is_an_ignored_anomaly() {
        let reg = registry(&["Coin"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools
            .create_pool(&mut host, &reg, &[DropEntry::solo(TemplateId(0))], 1, false)
            .unwrap();
        let e = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        pools.release(&mut host, e);
        pools.release(&mut host, e);
        assert_eq!(pools.free_count(TemplateId(0)), 1, "never enqueued twice");
        assert!(host.destroyed.is_empty());
    }

    #[test]
    fn unassociated_release_destroys_the_object() {
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();

        let stray = host.world.spawn_empty().id();
        pools.release(&mut host, stray);
        assert_eq!(host.destroyed, vec![stray]);
    }

    #[test]
    fn release_after_clear_destroys_instead_of_pooling() {
        let reg = registry(&["Coin"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools
            .create_pool(&mut host, &reg, &[DropEntry::solo(TemplateId(0))], 2, false)
            .unwrap();
        let leased = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();

        pools.clear_all(&mut host);
        assert_eq!(host.destroyed.len(), 1, "only the parked instance dies at clear");
        assert_eq!(pools.pool_count(), 0);

        pools.release(&mut host, leased);
        assert!(host.destroyed.contains(&leased));
    }

    #[test]
    fn duplicate_pool_is_rejected_even_reordered() {
        let reg = registry(&["Common", "Rare"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let forward = [
            DropEntry::new(TemplateId(0), 90.0),
            DropEntry::new(TemplateId(1), 10.0),
        ];
        let backward = [
            DropEntry::new(TemplateId(1), 10.0),
            DropEntry::new(TemplateId(0), 90.0),
        ];

        pools.create_pool(&mut host, &reg, &forward, 2, true).unwrap();
        let err = pools.create_pool(&mut host, &reg, &backward, 2, true).unwrap_err();
        assert!(matches!(err, SpawnError::DuplicatePool(_)));
    }

    #[test]
    fn underscored_name_does_not_collide_with_a_joined_key() {
        let reg = registry(&["A", "B", "A_B"]);
        let pair = [
            DropEntry::new(TemplateId(0), 1.0),
            DropEntry::new(TemplateId(1), 1.0),
        ];
        let solo = [DropEntry::solo(TemplateId(2))];
        let joined = PoolRegistry::pool_key(&pair, &reg).unwrap();
        let literal = PoolRegistry::pool_key(&solo, &reg).unwrap();
        assert_ne!(joined, literal);

        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        pools.create_pool(&mut host, &reg, &pair, 1, true).unwrap();
        pools.create_pool(&mut host, &reg, &solo, 1, true).unwrap();
        assert_eq!(pools.pool_count(), 2);
    }

    #[test]
    fn preload_skips_bad_seeds_and_keeps_the_rest() {
        let reg = registry(&["Coin", "Gem"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();

        let good = PoolSeed {
            entries: vec![DropEntry::solo(TemplateId(0))],
            size: 2,
            expandable: false,
        };
        let duplicate = good.clone();
        let unknown = PoolSeed {
            entries: vec![DropEntry::solo(TemplateId(9))],
            size: 2,
            expandable: false,
        };
        let other = PoolSeed {
            entries: vec![DropEntry::solo(TemplateId(1))],
            size: 3,
            expandable: true,
        };
        pools.preload(&mut host, &reg, &[good, duplicate, unknown, other]);

        assert_eq!(pools.pool_count(), 2);
        assert_eq!(pools.free_count(TemplateId(0)), 2);
        assert_eq!(pools.free_count(TemplateId(1)), 3);
    }

    #[test]
    fn acquire_creates_a_missing_pool_on_demand() {
        let reg = registry(&["Coin"]);
        let entries = [DropEntry::solo(TemplateId(0))];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        let e = pools
            .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap();
        assert!(e.is_some());
        assert_eq!(host.created, ON_DEMAND_POOL_SIZE);
        assert_eq!(pools.pool_count(), 1);
    }

    #[test]
    fn zero_weight_template_is_seeded_but_never_rolled() {
        let reg = registry(&["Coin", "Crown"]);
        let entries = [
            DropEntry::new(TemplateId(0), 1.0),
            DropEntry::new(TemplateId(1), 0.0),
        ];
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools.create_pool(&mut host, &reg, &entries, 2, true).unwrap();
        assert_eq!(pools.free_count(TemplateId(1)), 2, "zero-weight slots are seeded");

        for _ in 0..200 {
            let e = pools
                .acquire(&mut host, &reg, &entries, Vec3::ZERO, Quat::IDENTITY, &mut rng)
                .unwrap()
                .unwrap();
            pools.release(&mut host, e);
        }
        assert_eq!(pools.free_count(TemplateId(1)), 2, "weighted path never touched it");

        // Direct acquisition still reaches the zero-weight template.
        let crown = pools
            .acquire_one(&mut host, &reg, TemplateId(1), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap();
        assert!(crown.is_some());
    }

    #[test]
    fn release_callback_fires_exactly_once() {
        let reg = registry(&["Coin"]);
        let mut host = MockHost::new();
        let mut pools = PoolRegistry::default();
        let mut rng = rng();

        pools
            .create_pool(&mut host, &reg, &[DropEntry::solo(TemplateId(0))], 1, false)
            .unwrap();
        let e = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        assert!(pools.set_release_callback(e, Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })));

        pools.release(&mut host, e);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Re-acquire + release without a new callback stays at one.
        let e2 = pools
            .acquire_one(&mut host, &reg, TemplateId(0), Vec3::ZERO, Quat::IDENTITY, &mut rng)
            .unwrap()
            .unwrap();
        pools.release(&mut host, e2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A parked instance refuses new callbacks.
        assert!(!pools.set_release_callback(e2, Box::new(|_| {})));
    }
}
