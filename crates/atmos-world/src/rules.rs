//! The hazard-rule table.
//!
//! A static lookup of damage amounts, per-hazard toggles, and a material id
//! to multiplier mapping. The table is loaded as part of the session
//! configuration and never changes during a session.
//!
//! Unknown material ids are not fatal: [`DamageRules::material_or_fallback`]
//! logs a warning and uses the lowest-id entry, so damage keeps flowing under
//! *some* policy.

use std::collections::BTreeMap;

use atmos_types::{EffectId, GridSize};
use serde::Deserialize;
use tracing::warn;

/// Damage multipliers for one terrain material.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoxelDamageItem {
    /// Multiplier applied to grid and floating-object contact damage.
    #[serde(default = "default_multiplier")]
    pub damage_multiplier: f32,

    /// Multiplier applied to character contact damage.
    #[serde(default = "default_multiplier")]
    pub character_multiplier: f32,

    /// Particle effect shown on blocks touching this material.
    #[serde(default)]
    pub particle_effect: Option<EffectId>,
}

/// Damage amounts, hazard toggles and the material table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DamageRules {
    /// Damage per exposed block on small grids, and per floating object.
    #[serde(default = "default_small_ship_damage")]
    pub small_ship_damage: f32,

    /// Damage per exposed block on large grids, and per buried floating object.
    #[serde(default = "default_large_ship_damage")]
    pub large_ship_damage: f32,

    /// Base damage per character per pass.
    #[serde(default = "default_player_damage")]
    pub player_damage_amount: f32,

    /// Master switch for the character pass.
    #[serde(default = "default_true")]
    pub damage_players: bool,

    /// Characters outside cover take acid-rain damage.
    #[serde(default = "default_true")]
    pub player_acid_rain: bool,

    /// Characters breathing ambient air take radiation damage.
    #[serde(default)]
    pub player_radiation_damage: bool,

    /// Characters standing on a listed material take contact damage.
    #[serde(default = "default_true")]
    pub player_voxel_damage: bool,

    /// Blocks touching a listed material take contact damage.
    #[serde(default = "default_true")]
    pub block_voxel_damage: bool,

    /// Exterior blocks take radiation damage.
    #[serde(default)]
    pub block_radiation_damage: bool,

    /// Sky-facing blocks take acid-rain damage.
    #[serde(default = "default_true")]
    pub block_acid_rain: bool,

    /// Fraction of a grid's blocks picked for exposure damage per pass.
    #[serde(default = "default_exposed_fraction")]
    pub exposed_block_fraction: f64,

    /// Characters closer than this to the surface are in contact with it.
    #[serde(default = "default_character_contact")]
    pub character_contact_distance: f64,

    /// Floating objects closer than this to the surface are in contact.
    #[serde(default = "default_floating_contact")]
    pub floating_contact_distance: f64,

    /// Material id to multipliers.
    #[serde(default = "default_voxel_ids")]
    pub voxel_ids: BTreeMap<u8, VoxelDamageItem>,
}

impl Default for DamageRules {
    fn default() -> Self {
        Self {
            small_ship_damage: default_small_ship_damage(),
            large_ship_damage: default_large_ship_damage(),
            player_damage_amount: default_player_damage(),
            damage_players: true,
            player_acid_rain: true,
            player_radiation_damage: false,
            player_voxel_damage: true,
            block_voxel_damage: true,
            block_radiation_damage: false,
            block_acid_rain: true,
            exposed_block_fraction: default_exposed_fraction(),
            character_contact_distance: default_character_contact(),
            floating_contact_distance: default_floating_contact(),
            voxel_ids: default_voxel_ids(),
        }
    }
}

impl DamageRules {
    /// Exposure damage for one block of a grid of the given size.
    pub const fn grid_damage(&self, size: GridSize) -> f32 {
        match size {
            GridSize::Small => self.small_ship_damage,
            GridSize::Large => self.large_ship_damage,
        }
    }

    /// Whether either sky hazard applies to blocks.
    pub const fn blocks_exposed_to_sky(&self) -> bool {
        self.block_acid_rain || self.block_radiation_damage
    }

    /// Exact lookup of a material.
    pub fn material(&self, id: u8) -> Option<&VoxelDamageItem> {
        self.voxel_ids.get(&id)
    }

    /// Lookup that falls back to the lowest-id entry for unknown materials.
    ///
    /// Returns `None` only when the table is empty.
    pub fn material_or_fallback(&self, id: u8) -> Option<&VoxelDamageItem> {
        if let Some(item) = self.voxel_ids.get(&id) {
            return Some(item);
        }
        let fallback = self.voxel_ids.first_key_value();
        warn!(
            material = id,
            fallback = fallback.map(|(k, _)| *k),
            "unknown material id in hazard rules, using fallback entry"
        );
        fallback.map(|(_, item)| item)
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_multiplier() -> f32 {
    1.0
}

const fn default_small_ship_damage() -> f32 {
    5.0
}

const fn default_large_ship_damage() -> f32 {
    10.0
}

const fn default_player_damage() -> f32 {
    2.0
}

const fn default_exposed_fraction() -> f64 {
    0.3
}

const fn default_character_contact() -> f64 {
    2.5
}

const fn default_floating_contact() -> f64 {
    2.0
}

const fn default_true() -> bool {
    true
}

fn default_voxel_ids() -> BTreeMap<u8, VoxelDamageItem> {
    let mut m = BTreeMap::new();
    m.insert(
        0,
        VoxelDamageItem {
            damage_multiplier: 1.0,
            character_multiplier: 1.0,
            particle_effect: None,
        },
    );
    m.insert(
        7,
        VoxelDamageItem {
            damage_multiplier: 2.5,
            character_multiplier: 4.0,
            particle_effect: Some(EffectId(1)),
        },
    );
    m
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn grid_damage_depends_on_size() {
        let rules = DamageRules::default();
        assert_eq!(rules.grid_damage(GridSize::Small), 5.0);
        assert_eq!(rules.grid_damage(GridSize::Large), 10.0);
    }

    #[test]
    fn unknown_material_falls_back_to_first_entry() {
        let rules = DamageRules::default();
        assert!(rules.material(42).is_none());
        let item = rules.material_or_fallback(42).unwrap();
        assert_eq!(item, rules.material(0).unwrap());
    }

    #[test]
    fn empty_table_has_no_fallback() {
        let rules = DamageRules {
            voxel_ids: BTreeMap::new(),
            ..DamageRules::default()
        };
        assert!(rules.material_or_fallback(3).is_none());
    }

    #[test]
    fn parse_material_table_from_yaml() {
        let yaml = r"
small_ship_damage: 1.5
block_acid_rain: false
voxel_ids:
  3:
    damage_multiplier: 2.0
    particle_effect: 12
  9:
    character_multiplier: 0.5
";
        let rules: DamageRules = serde_yml::from_str(yaml).unwrap();
        assert_eq!(rules.small_ship_damage, 1.5);
        assert!(!rules.block_acid_rain);
        assert_eq!(rules.voxel_ids.len(), 2);
        let lava = rules.material(3).unwrap();
        assert_eq!(lava.particle_effect, Some(EffectId(12)));
        assert_eq!(lava.character_multiplier, 1.0);
        assert_eq!(rules.material(9).unwrap().damage_multiplier, 1.0);
    }
}
