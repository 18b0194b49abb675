// src/spawn/registry.rs
//! Data-driven spawn templates + loader.

use bevy::asset::{io::Reader, AssetLoader, LoadContext};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::core::TemplateId;

// ---------- Public plugin to register asset+loader ----------

pub struct TemplateRegistryAssetPlugin;

impl Plugin for TemplateRegistryAssetPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<TemplateRegistry>()
            .register_asset_loader(TemplateRegistryLoader);
    }
}

// ---------- Template definition (data form) ----------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateDef {
    /// Unique human-readable name (used for lookup and pool keys).
    pub name: String,

    /// Optional category hint (e.g., "health", "ammo", "score").
    #[serde(default)]
    pub category: Option<String>,

    /// Seconds a leased instance stays alive before a timeout trigger.
    #[serde(default = "default_lifetime")]
    pub lifetime: f32,

    /// Return to the pool when the player collects the instance.
    #[serde(default = "default_true")]
    pub return_on_player_trigger: bool,

    /// Return to the pool when a bot/other actor collects the instance.
    #[serde(default = "default_true")]
    pub return_on_other_trigger: bool,
}

fn default_lifetime() -> f32 {
    30.0
}
fn default_true() -> bool {
    true
}

// ---------- Runtime registry asset ----------

#[derive(Asset, TypePath, Clone, Debug)]
pub struct TemplateRegistry {
    /// Ordered list; index in this vector is the `TemplateId.0`.
    pub templates: Vec<TemplateDef>,
    /// Name → index for quick lookups.
    pub name_to_index: HashMap<String, u32>,
}

impl TemplateRegistry {
    /// Build from definitions, rejecting duplicate, empty, or reserved
    /// names. `+` is the pool-key separator and cannot appear in a name.
    pub fn from_defs(defs: Vec<TemplateDef>) -> Result<Self, TemplateRegistryLoadError> {
        let mut name_to_index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if def.name.is_empty() || def.name.contains('+') {
                return Err(TemplateRegistryLoadError::InvalidName { name: def.name.clone() });
            }
            if let Some(prev) = name_to_index.insert(def.name.clone(), i as u32) {
                return Err(TemplateRegistryLoadError::DuplicateName {
                    name: def.name.clone(),
                    first: prev,
                    second: i as u32,
                });
            }
        }
        Ok(Self { templates: defs, name_to_index })
    }

    pub fn index_of(&self, name: &str) -> Option<TemplateId> {
        self.name_to_index.get(name).map(|&i| TemplateId(i))
    }

    pub fn get(&self, id: TemplateId) -> Option<&TemplateDef> {
        self.templates.get(id.0 as usize)
    }
}

// ---------- Asset loader for `.spawn.ron` ----------

#[derive(Default)]
pub struct TemplateRegistryLoader;

impl AssetLoader for TemplateRegistryLoader {
    type Asset = TemplateRegistry;
    type Settings = ();
    type Error = TemplateRegistryLoadError;

    fn extensions(&self) -> &[&str] {
        &["spawn.ron"]
    }

    async fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &Self::Settings,
        _load_context: &mut LoadContext<'_>,
    ) -> Result<Self::Asset, Self::Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        let defs: Vec<TemplateDef> = ron::de::from_bytes(&bytes)
            .map_err(|e| TemplateRegistryLoadError::Ron(e.to_string()))?;
        TemplateRegistry::from_defs(defs)
    }
}

// ---------- Loader errors ----------

#[derive(thiserror::Error, Debug)]
pub enum TemplateRegistryLoadError {
    #[error("I/O while reading registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(String),
    #[error("Duplicate template name '{name}' (first idx {first}, second idx {second})")]
    DuplicateName { name: String, first: u32, second: u32 },
    #[error("Template name '{name}' is empty or contains the reserved '+' separator")]
    InvalidName { name: String },
}
