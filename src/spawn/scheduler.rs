// src/spawn/scheduler.rs
//! Weighted spawn scheduler: decides when a spawn fires and where it
//! lands, asks the pool registry for instances, and enforces a soft cap
//! on concurrently active ones.

use bevy::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::core::{DropEntry, IntervalPolicy, SpawnAnchor, SpawnBounds, SpawnError};
use super::pool::{InstanceHost, PoolKey, PoolRegistry};
use super::registry::TemplateRegistry;

// ---------- Configuration (data form) ----------

/// One spawn location with its own weight and timer policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnPointData {
    pub anchor: SpawnAnchor,
    #[serde(default = "default_point_weight")]
    pub weight: f32,
    #[serde(default)]
    pub interval: IntervalPolicy,
}

fn default_point_weight() -> f32 {
    1.0
}

/// Where spawns land. Modes are mutually exclusive per spawner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SpawnMode {
    /// One fixed location, driven by the global timer.
    SinglePoint { point: Option<SpawnAnchor> },
    /// Several locations, each with an independent timer; global spawn
    /// events pick one location by weight.
    MultiplePoints { points: Vec<SpawnPointData> },
    /// Uniform random point inside an axis-aligned box.
    Area { bounds: SpawnBounds },
    /// Spawn at the scheduler's own anchor (externally-driven placement).
    Path,
}

/// Soft cap on concurrently active instances. `min`/`max` form a
/// hysteresis band checked at a low frequency.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ActiveLimit {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_active")]
    pub max: usize,
    #[serde(default)]
    pub min: usize,
    #[serde(default = "default_check_interval")]
    pub check_interval: f32,
}

fn default_max_active() -> usize {
    10
}
fn default_check_interval() -> f32 {
    1.0
}

impl Default for ActiveLimit {
    fn default() -> Self {
        Self { enabled: false, max: 10, min: 0, check_interval: 1.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Weighted set of templates this spawner draws from.
    pub entries: Vec<DropEntry>,
    pub mode: SpawnMode,
    #[serde(default)]
    pub global_interval: IntervalPolicy,
    #[serde(default = "default_count")]
    pub min_count: u32,
    #[serde(default = "default_count")]
    pub max_count: u32,
    #[serde(default)]
    pub use_random_count: bool,
    #[serde(default = "default_pool_size")]
    pub initial_pool_size: usize,
    #[serde(default = "default_true")]
    pub pool_expandable: bool,
    #[serde(default)]
    pub spawn_on_init: bool,
    #[serde(default)]
    pub active_limit: ActiveLimit,
}

fn default_count() -> u32 {
    1
}
fn default_pool_size() -> usize {
    10
}
fn default_true() -> bool {
    true
}

// ---------- Runtime ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnerState {
    Uninitialized,
    Initialized,
    Running,
    Disposed,
}

/// Everything a spawner needs from the outside world for one operation.
pub struct SpawnContext<'a, R: Rng> {
    pub pools: &'a mut PoolRegistry,
    pub registry: &'a TemplateRegistry,
    pub host: &'a mut dyn InstanceHost,
    pub rng: &'a mut R,
}

#[derive(Component)]
pub struct Spawner {
    config: SpawnerConfig,
    state: SpawnerState,
    pool: Option<PoolKey>,
    global_timer: f32,
    point_timers: Vec<f32>,
    limit_timer: f32,
    spawning_allowed: bool,
    active: Vec<Entity>,
}

impl Spawner {
    pub fn new(config: SpawnerConfig) -> Self {
        Self {
            config,
            state: SpawnerState::Uninitialized,
            pool: None,
            global_timer: 0.0,
            point_timers: Vec::new(),
            limit_timer: 0.0,
            spawning_allowed: true,
            active: Vec::new(),
        }
    }

    pub fn state(&self) -> SpawnerState {
        self.state
    }

    pub fn spawning_allowed(&self) -> bool {
        self.spawning_allowed
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pool_key(&self) -> Option<&PoolKey> {
        self.pool.as_ref()
    }

    /// Arm timers and create the backing pool. A pool that already exists
    /// for the same entry set is reused. Returns whatever `spawn_on_init`
    /// produced.
    pub fn init<R: Rng>(
        &mut self,
        origin: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
    ) -> Result<Vec<Entity>, SpawnError> {
        if self.state != SpawnerState::Uninitialized {
            return Ok(Vec::new());
        }
        self.validate_config();
        self.ensure_pool(ctx)?;

        if let SpawnMode::MultiplePoints { points } = &self.config.mode {
            self.point_timers = vec![0.0; points.len()];
        }
        self.state = SpawnerState::Initialized;

        let mut out = Vec::new();
        if self.config.spawn_on_init {
            self.spawn_objects(origin, ctx, &mut out);
        }
        Ok(out)
    }

    fn validate_config(&self) {
        if let IntervalPolicy::RandomDiscrete { choices } = &self.config.global_interval {
            if choices.is_empty() {
                warn!("spawner has an empty RandomDiscrete interval; its timer will never fire");
            }
        }
        if self.config.min_count > self.config.max_count {
            warn!(
                "spawner count range inverted ({}..{}); using the smaller bound first",
                self.config.min_count, self.config.max_count
            );
        }
    }

    fn ensure_pool<R: Rng>(&mut self, ctx: &mut SpawnContext<'_, R>) -> Result<(), SpawnError> {
        match ctx.pools.create_pool(
            ctx.host,
            ctx.registry,
            &self.config.entries,
            self.config.initial_pool_size,
            self.config.pool_expandable,
        ) {
            Ok(key) => {
                self.pool = Some(key);
                Ok(())
            }
            Err(SpawnError::DuplicatePool(key)) => {
                debug!("spawner reusing existing pool '{key}'");
                self.pool = Some(PoolKey(key));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Advance timers by `dt` and fire any due spawns. `origin` is the
    /// scheduler's own anchor, used by Path mode. Returns the instances
    /// spawned this tick.
    pub fn tick<R: Rng>(
        &mut self,
        dt: f32,
        origin: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
    ) -> Vec<Entity> {
        match self.state {
            SpawnerState::Uninitialized | SpawnerState::Disposed => return Vec::new(),
            SpawnerState::Initialized => self.state = SpawnerState::Running,
            SpawnerState::Running => {}
        }

        let mut out = Vec::new();
        match &self.config.mode {
            SpawnMode::SinglePoint { point } => {
                let point = *point;
                self.tick_single(dt, point, ctx, &mut out);
            }
            SpawnMode::MultiplePoints { .. } => self.tick_points(dt, ctx, &mut out),
            SpawnMode::Area { .. } | SpawnMode::Path => self.tick_global(dt, origin, ctx, &mut out),
        }
        self.tick_limit(dt, ctx.host);
        out
    }

    fn tick_single<R: Rng>(
        &mut self,
        dt: f32,
        point: Option<SpawnAnchor>,
        ctx: &mut SpawnContext<'_, R>,
        out: &mut Vec<Entity>,
    ) {
        // No anchor, no accumulation.
        let Some(anchor) = point else { return };
        self.global_timer += dt;
        let interval = self.config.global_interval.resolve(ctx.rng);
        if self.global_timer >= interval {
            self.spawn_at(anchor, ctx, out);
            // Reset to zero: a long frame gap yields one spawn, not a
            // catch-up burst.
            self.global_timer = 0.0;
        }
    }

    fn tick_points<R: Rng>(&mut self, dt: f32, ctx: &mut SpawnContext<'_, R>, out: &mut Vec<Entity>) {
        let n = match &self.config.mode {
            SpawnMode::MultiplePoints { points } => points.len(),
            _ => return,
        };
        if self.point_timers.len() != n {
            self.point_timers.resize(n, 0.0);
        }
        for i in 0..n {
            self.point_timers[i] += dt;
            let (anchor, interval) = {
                let SpawnMode::MultiplePoints { points } = &self.config.mode else { return };
                (points[i].anchor, points[i].interval.resolve(ctx.rng))
            };
            if self.point_timers[i] >= interval {
                // A fired point always spawns at that exact point.
                self.spawn_at(anchor, ctx, out);
                self.point_timers[i] = 0.0;
            }
        }
    }

    fn tick_global<R: Rng>(
        &mut self,
        dt: f32,
        origin: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
        out: &mut Vec<Entity>,
    ) {
        self.global_timer += dt;
        let interval = self.config.global_interval.resolve(ctx.rng);
        if self.global_timer >= interval {
            self.spawn_objects(origin, ctx, out);
            self.global_timer = 0.0;
        }
    }

    /// One logical spawn event: resolve the batch size, then place each
    /// spawn according to the mode. Each spawn re-checks the active gate.
    pub fn spawn_objects<R: Rng>(
        &mut self,
        origin: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
        out: &mut Vec<Entity>,
    ) {
        if matches!(self.state, SpawnerState::Uninitialized | SpawnerState::Disposed) {
            return;
        }
        if self.config.active_limit.enabled && !self.spawning_allowed {
            return;
        }

        let lo = self.config.min_count.min(self.config.max_count);
        let hi = self.config.min_count.max(self.config.max_count);
        let count = if self.config.use_random_count {
            ctx.rng.random_range(lo..=hi)
        } else {
            lo
        };

        for _ in 0..count {
            let anchor = match &self.config.mode {
                SpawnMode::SinglePoint { point } => match point {
                    Some(anchor) => *anchor,
                    None => {
                        warn!("spawn skipped: single-point spawner has no anchor");
                        return;
                    }
                },
                SpawnMode::MultiplePoints { .. } => match self.pick_point(ctx.rng) {
                    Some(anchor) => anchor,
                    None => {
                        warn!("spawn skipped: no selectable spawn point");
                        return;
                    }
                },
                SpawnMode::Area { bounds } => SpawnAnchor::at(bounds.random_point(ctx.rng)),
                SpawnMode::Path => origin,
            };
            self.spawn_at(anchor, ctx, out);
        }
    }

    /// Force a single spawn event past the active gate. The gate's prior
    /// state is restored afterwards.
    pub fn force_spawn<R: Rng>(
        &mut self,
        origin: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
    ) -> Vec<Entity> {
        let was_allowed = self.spawning_allowed;
        self.spawning_allowed = true;
        let mut out = Vec::new();
        self.spawn_objects(origin, ctx, &mut out);
        self.spawning_allowed = was_allowed;
        out
    }

    fn spawn_at<R: Rng>(
        &mut self,
        anchor: SpawnAnchor,
        ctx: &mut SpawnContext<'_, R>,
        out: &mut Vec<Entity>,
    ) {
        if self.config.active_limit.enabled && !self.spawning_allowed {
            return;
        }

        let acquired = ctx.pools.acquire(
            ctx.host,
            ctx.registry,
            &self.config.entries,
            anchor.translation,
            anchor.rotation,
            ctx.rng,
        );
        match acquired {
            Ok(Some(instance)) => {
                out.push(instance);
                if self.config.active_limit.enabled {
                    self.active.push(instance);
                    if self.active.len() >= self.config.active_limit.max {
                        self.spawning_allowed = false;
                    }
                }
            }
            // Exhausted non-expandable pool; already logged by the pool.
            Ok(None) => {}
            Err(e) => warn!("spawn attempt failed: {e}"),
        }
    }

    /// Roulette pick among spawn points, same walk as template selection.
    fn pick_point(&self, rng: &mut impl Rng) -> Option<SpawnAnchor> {
        let SpawnMode::MultiplePoints { points } = &self.config.mode else {
            return None;
        };
        let total: f32 = points.iter().map(|p| p.weight.max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let roll = rng.random_range(0.0..total);
        let mut acc = 0.0;
        for p in points {
            if p.weight <= 0.0 {
                continue;
            }
            acc += p.weight;
            if roll <= acc {
                return Some(p.anchor);
            }
        }
        points.iter().find(|p| p.weight > 0.0).map(|p| p.anchor)
    }

    /// Low-frequency active-cap check: prune dead handles, then apply the
    /// band. Anything strictly under `max` re-enables spawning; the band
    /// only gates between the immediate disable at `max` and this check.
    fn tick_limit(&mut self, dt: f32, host: &mut dyn InstanceHost) {
        if !self.config.active_limit.enabled {
            return;
        }
        self.limit_timer += dt;
        if self.limit_timer < self.config.active_limit.check_interval {
            return;
        }
        self.limit_timer = 0.0;

        self.active.retain(|e| host.is_alive(*e));
        let count = self.active.len();
        let limit = self.config.active_limit;
        if count >= limit.max {
            self.spawning_allowed = false;
        } else if count <= limit.min {
            self.spawning_allowed = true;
        } else {
            self.spawning_allowed = true;
        }
    }

    /// Drop a released instance from the active set.
    pub fn notify_released(&mut self, instance: Entity) {
        if let Some(i) = self.active.iter().position(|&e| e == instance) {
            self.active.swap_remove(i);
        }
    }

    /// Release everything this spawner still tracks and stop for good.
    pub fn dispose<R: Rng>(&mut self, ctx: &mut SpawnContext<'_, R>) {
        if self.state == SpawnerState::Disposed {
            return;
        }
        for instance in std::mem::take(&mut self.active) {
            if ctx.host.is_alive(instance) {
                ctx.pools.release(ctx.host, instance);
            }
        }
        self.state = SpawnerState::Disposed;
    }

    // ---------- Runtime reconfiguration ----------

    /// Swap the weighted set; makes sure a pool exists for it.
    pub fn set_entries<R: Rng>(&mut self, entries: Vec<DropEntry>, ctx: &mut SpawnContext<'_, R>) {
        self.config.entries = entries;
        if self.state != SpawnerState::Uninitialized {
            if let Err(e) = self.ensure_pool(ctx) {
                warn!("could not prepare pool for new entries: {e}");
            }
        }
    }

    pub fn set_mode(&mut self, mode: SpawnMode) {
        self.point_timers.clear();
        self.global_timer = 0.0;
        self.config.mode = mode;
    }

    pub fn add_spawn_point(&mut self, point: SpawnPointData) {
        match &mut self.config.mode {
            SpawnMode::MultiplePoints { points } => {
                points.push(point);
                self.point_timers.push(0.0);
            }
            _ => warn!("add_spawn_point ignored: spawner is not in MultiplePoints mode"),
        }
    }

    /// Clamp and set the hysteresis band (`min >= 0`, `max >= min`).
    pub fn set_active_limit(&mut self, min: usize, max: usize) {
        self.config.active_limit.min = min;
        self.config.active_limit.max = max.max(min);
    }

    /// Toggle the cap sub-feature; independent of the top-level lifecycle.
    pub fn set_active_limit_enabled(&mut self, enabled: bool) {
        self.config.active_limit.enabled = enabled;
        if enabled {
            self.limit_timer = 0.0;
        }
    }
}
