//! Configuration loading and typed config structures for the hazard
//! simulation.
//!
//! The canonical configuration lives in `atmos-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads the file, and [`HazardConfig::validate`],
//! which rejects throttling settings the pipeline cannot run with.
//!
//! Every field has a default, so an empty document is a valid configuration.

use std::path::Path;

use atmos_world::DamageRules;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The values parsed but are inconsistent.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Which rule was violated.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level hazard configuration.
///
/// Mirrors the structure of `atmos-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HazardConfig {
    /// Session-level settings (seed, timing, admission, copies).
    #[serde(default)]
    pub session: SessionConfig,

    /// Collection period, worker cadence and queue bound.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// The hazard-rule table.
    #[serde(default)]
    pub rules: DamageRules,

    /// Rain sampling parameters.
    #[serde(default)]
    pub rain: RainConfig,

    /// Particle emitter distances.
    #[serde(default)]
    pub emitters: EmitterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HazardConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The result is not validated; call [`validate`](Self::validate).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Check the cross-field rules the pipeline depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.throttle;
        let r = &self.rain;
        ensure(t.worker_interval > 0, "throttle.worker_interval must be positive")?;
        ensure(t.update_rate > 0, "throttle.update_rate must be positive")?;
        ensure(
            t.update_rate.checked_rem(t.worker_interval) == Some(0),
            "throttle.update_rate must be divisible by throttle.worker_interval",
        )?;
        ensure(
            t.character_interval > 0
                && t.character_interval.checked_rem(t.worker_interval) == Some(0),
            "throttle.character_interval must be a positive multiple of throttle.worker_interval",
        )?;
        ensure(t.max_queue > 0, "throttle.max_queue must be positive")?;
        ensure(r.sample_every > 0, "rain.sample_every must be positive")?;
        ensure(r.line_count > 0, "rain.line_count must be positive")?;
        ensure(
            r.drop_size_min.is_finite() && r.drop_size_max.is_finite(),
            "rain.drop_size_min and rain.drop_size_max must be finite",
        )?;
        ensure(
            r.drop_size_min > 0.0 && r.drop_size_min <= r.drop_size_max,
            "rain.drop_size_min must be positive and no larger than rain.drop_size_max",
        )?;
        ensure(
            r.thickness_min.is_finite() && r.thickness_max.is_finite(),
            "rain.thickness_min and rain.thickness_max must be finite",
        )?;
        ensure(
            r.thickness_min >= 0.0 && r.thickness_min <= r.thickness_max,
            "rain.thickness_min must be non-negative and no larger than rain.thickness_max",
        )?;
        ensure(
            r.length_fraction.is_finite() && r.length_fraction > 0.0,
            "rain.length_fraction must be finite and positive",
        )?;
        ensure(r.pool_growth > 0, "rain.pool_growth must be positive")?;
        ensure(
            r.far_plane.is_finite() && r.near_plane > 0.0 && r.near_plane < r.far_plane,
            "rain.near_plane must be positive and below rain.far_plane",
        )?;
        ensure(
            !self.rules.voxel_ids.is_empty(),
            "rules.voxel_ids must contain at least one material",
        )?;
        Ok(())
    }
}

fn ensure(condition: bool, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            reason: reason.to_owned(),
        })
    }
}

/// Session-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Random seed for shuffles, line offsets and block picks.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time milliseconds per simulation tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Ticks to run before the runner stops (0 = unlimited).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Only sources whose name starts with this prefix are attached.
    #[serde(default)]
    pub source_name_prefix: String,

    /// Cause label passed with every damage application.
    #[serde(default = "default_damage_cause")]
    pub damage_cause: String,

    /// How many copies of the aggregation logic are loaded.
    #[serde(default = "default_aggregator_copies")]
    pub aggregator_copies: u32,

    /// Keep scan lines for the debug-draw topic and log collection counts.
    #[serde(default)]
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: default_max_ticks(),
            source_name_prefix: String::new(),
            damage_cause: default_damage_cause(),
            aggregator_copies: default_aggregator_copies(),
            debug: false,
        }
    }
}

/// Collection period and worker cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThrottleConfig {
    /// Ticks between collection cycles (N).
    #[serde(default = "default_update_rate")]
    pub update_rate: u64,

    /// Ticks between worker scheduling opportunities.
    #[serde(default = "default_worker_interval")]
    pub worker_interval: u64,

    /// Ticks between character passes.
    #[serde(default = "default_character_interval")]
    pub character_interval: u64,

    /// Capacity of the pending queue.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            update_rate: default_update_rate(),
            worker_interval: default_worker_interval(),
            character_interval: default_character_interval(),
            max_queue: default_max_queue(),
        }
    }
}

/// Rain sampling configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RainConfig {
    /// Master switch for the sampler.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sample every this many visual frames.
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,

    /// Lines drawn per sampling cycle.
    #[serde(default = "default_line_count")]
    pub line_count: usize,

    /// Lateral offsets are drawn from `-lateral_spread..lateral_spread`.
    #[serde(default = "default_lateral_spread")]
    pub lateral_spread: i32,

    /// Tested line length as a fraction of the frustum box half-height.
    #[serde(default = "default_length_fraction")]
    pub length_fraction: f64,

    /// Smallest droplet length.
    #[serde(default = "default_drop_size_min")]
    pub drop_size_min: f64,

    /// Largest droplet length.
    #[serde(default = "default_drop_size_max")]
    pub drop_size_max: f64,

    /// Skip counter is reset to a value in `0..skip_max`.
    #[serde(default = "default_skip_max")]
    pub skip_max: u32,

    /// Initial probe pool capacity.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Probe pool growth step.
    #[serde(default = "default_pool_growth")]
    pub pool_growth: usize,

    /// Probes handed to the renderer per frame.
    #[serde(default = "default_draw_limit")]
    pub draw_limit: usize,

    /// Smallest drawn line thickness.
    #[serde(default = "default_thickness_min")]
    pub thickness_min: f32,

    /// Largest drawn line thickness.
    #[serde(default = "default_thickness_max")]
    pub thickness_max: f32,

    /// Near plane of the sampling projection.
    #[serde(default = "default_near_plane")]
    pub near_plane: f64,

    /// Far plane of the sampling projection.
    #[serde(default = "default_far_plane")]
    pub far_plane: f64,

    /// Frames between camera altitude refreshes.
    #[serde(default = "default_altitude_refresh")]
    pub altitude_refresh: u64,

    /// Frames between nearest-source refreshes.
    #[serde(default = "default_source_refresh")]
    pub source_refresh: u64,

    /// Sampling failures are logged at most once per this many frames.
    #[serde(default = "default_error_log_every")]
    pub error_log_every: u64,

    /// Warn when one timed cycle takes longer than this.
    #[serde(default = "default_budget_micros")]
    pub budget_micros: u64,
}

impl Default for RainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_every: default_sample_every(),
            line_count: default_line_count(),
            lateral_spread: default_lateral_spread(),
            length_fraction: default_length_fraction(),
            drop_size_min: default_drop_size_min(),
            drop_size_max: default_drop_size_max(),
            skip_max: default_skip_max(),
            pool_capacity: default_pool_capacity(),
            pool_growth: default_pool_growth(),
            draw_limit: default_draw_limit(),
            thickness_min: default_thickness_min(),
            thickness_max: default_thickness_max(),
            near_plane: default_near_plane(),
            far_plane: default_far_plane(),
            altitude_refresh: default_altitude_refresh(),
            source_refresh: default_source_refresh(),
            error_log_every: default_error_log_every(),
            budget_micros: default_budget_micros(),
        }
    }
}

/// Particle emitter configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmitterConfig {
    /// Emitters farther than this from the camera are removed.
    #[serde(default = "default_keep_radius")]
    pub keep_radius: f64,

    /// New emitters are only created within this distance of the camera.
    #[serde(default = "default_spawn_radius")]
    pub spawn_radius: f64,

    /// Emitter scale on small grids.
    #[serde(default = "default_small_grid_scale")]
    pub small_grid_scale: f32,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            keep_radius: default_keep_radius(),
            spawn_radius: default_spawn_radius(),
            small_grid_scale: default_small_grid_scale(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per event instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_seed() -> u64 {
    42
}

const fn default_tick_interval_ms() -> u64 {
    16
}

const fn default_max_ticks() -> u64 {
    600
}

fn default_damage_cause() -> String {
    "Environment".to_owned()
}

const fn default_aggregator_copies() -> u32 {
    2
}

const fn default_update_rate() -> u64 {
    60
}

const fn default_worker_interval() -> u64 {
    10
}

const fn default_character_interval() -> u64 {
    60
}

const fn default_max_queue() -> usize {
    10_000
}

const fn default_true() -> bool {
    true
}

const fn default_sample_every() -> u64 {
    5
}

const fn default_line_count() -> usize {
    500
}

const fn default_lateral_spread() -> i32 {
    60
}

const fn default_length_fraction() -> f64 {
    0.25
}

const fn default_drop_size_min() -> f64 {
    0.8
}

const fn default_drop_size_max() -> f64 {
    1.5
}

const fn default_skip_max() -> u32 {
    8
}

const fn default_pool_capacity() -> usize {
    200_000
}

const fn default_pool_growth() -> usize {
    10_000
}

const fn default_draw_limit() -> usize {
    700
}

const fn default_thickness_min() -> f32 {
    0.01
}

const fn default_thickness_max() -> f32 {
    0.05
}

const fn default_near_plane() -> f64 {
    0.1
}

const fn default_far_plane() -> f64 {
    70.0
}

const fn default_altitude_refresh() -> u64 {
    60
}

const fn default_source_refresh() -> u64 {
    301
}

const fn default_error_log_every() -> u64 {
    100
}

const fn default_budget_micros() -> u64 {
    100
}

const fn default_keep_radius() -> f64 {
    200.0
}

const fn default_spawn_radius() -> f64 {
    100.0
}

const fn default_small_grid_scale() -> f32 {
    0.1
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = HazardConfig::parse("{}").unwrap();
        assert_eq!(config, HazardConfig::default());
        assert_eq!(config.throttle.update_rate, 60);
        assert_eq!(config.rain.pool_capacity, 200_000);
        assert_eq!(config.rain.pool_growth, 10_000);
        assert_eq!(config.emitters.keep_radius, 200.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r#"
session:
  seed: 7
  source_name_prefix: "Acid"
  debug: true
throttle:
  update_rate: 120
  max_queue: 50
rain:
  line_count: 64
  drop_size_min: 1.0
  drop_size_max: 1.0
rules:
  large_ship_damage: 12.5
logging:
  level: "debug"
  json: true
"#;
        let config = HazardConfig::parse(yaml).unwrap();
        assert_eq!(config.session.seed, 7);
        assert_eq!(config.session.source_name_prefix, "Acid");
        assert!(config.session.debug);
        assert_eq!(config.throttle.update_rate, 120);
        assert_eq!(config.throttle.worker_interval, 10);
        assert_eq!(config.throttle.max_queue, 50);
        assert_eq!(config.rain.line_count, 64);
        assert_eq!(config.rules.large_ship_damage, 12.5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn update_rate_must_divide_by_worker_interval() {
        let config = HazardConfig::parse("throttle:\n  update_rate: 65\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut config = HazardConfig::default();
        config.throttle.max_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_drop_sizes_are_rejected() {
        let mut config = HazardConfig::default();
        config.rain.drop_size_min = 2.0;
        config.rain.drop_size_max = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn infinite_drop_size_is_rejected() {
        let mut config = HazardConfig::default();
        config.rain.drop_size_max = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = HazardConfig::default();
        config.rain.drop_size_min = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_thickness_is_rejected() {
        let mut config = HazardConfig::default();
        config.rain.thickness_min = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = HazardConfig::default();
        config.rain.thickness_max = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_thickness_is_rejected() {
        let mut config = HazardConfig::default();
        config.rain.thickness_min = 0.2;
        config.rain.thickness_max = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_length_fraction_is_rejected() {
        for fraction in [f64::NAN, f64::INFINITY, 0.0] {
            let mut config = HazardConfig::default();
            config.rain.length_fraction = fraction;
            assert!(config.validate().is_err(), "accepted {fraction}");
        }
    }

    #[test]
    fn empty_material_table_is_rejected() {
        let mut config = HazardConfig::default();
        config.rules.voxel_ids.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let err = HazardConfig::parse("throttle: [").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../atmos-config.yaml");
        let config = HazardConfig::from_file(&path).unwrap();
        assert_eq!(config, HazardConfig::default());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HazardConfig::from_file(Path::new("/nonexistent/atmos-config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
