//! Engine configuration.
//!
//! Loaded from TOML with per-field defaults; every field can be omitted.
//! `validate()` is the startup/reload boundary where configuration errors
//! become fatal.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use nalgebra::DMatrix;
use serde::Deserialize;

use crate::core::types::RigidTransform;
use crate::engine::{DynamicPointsConfig, MapUpdateCondition, UpdatePolicy};
use crate::error::{MapperError, Result};

fn default_odom_frame() -> String {
    "odom".to_string()
}

fn default_sensor_frame() -> String {
    "lidar".to_string()
}

fn default_robot_frame() -> String {
    "base_link".to_string()
}

fn default_initial_map_pose() -> String {
    "[[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0], [0, 0, 0, 1]]".to_string()
}

fn default_final_map_file_name() -> String {
    "map.csv".to_string()
}

fn default_map_update_condition() -> MapUpdateCondition {
    MapUpdateCondition::Overlap
}

fn default_map_update_overlap() -> f32 {
    0.9
}

fn default_map_update_delay() -> f32 {
    1.0
}

fn default_map_update_distance() -> f32 {
    0.5
}

fn default_map_publish_rate() -> f32 {
    10.0
}

fn default_map_tf_publish_rate() -> f32 {
    10.0
}

fn default_max_idle_time() -> f32 {
    10.0
}

fn default_min_dist_new_point() -> f32 {
    0.03
}

fn default_sensor_max_range() -> f32 {
    80.0
}

fn default_prior_dynamic() -> f32 {
    0.6
}

fn default_threshold_dynamic() -> f32 {
    0.9
}

fn default_beam_half_angle() -> f32 {
    0.01
}

fn default_epsilon_a() -> f32 {
    0.01
}

fn default_epsilon_d() -> f32 {
    0.01
}

fn default_alpha() -> f32 {
    0.8
}

fn default_beta() -> f32 {
    0.99
}

fn default_true() -> bool {
    true
}

/// Full configuration surface of the mapper.
#[derive(Debug, Clone, Deserialize)]
pub struct MapperConfig {
    #[serde(default = "default_odom_frame")]
    pub odom_frame: String,

    #[serde(default = "default_sensor_frame")]
    pub sensor_frame: String,

    #[serde(default = "default_robot_frame")]
    pub robot_frame: String,

    /// Map file seeding the engine; empty means "start from scratch".
    #[serde(default)]
    pub initial_map_file_name: String,

    /// Row-major homogeneous matrix, rows in brackets, commas or
    /// semicolons as separators. Only parsed when an initial map is named.
    #[serde(default = "default_initial_map_pose")]
    pub initial_map_pose: String,

    /// Where the offline idle supervisor saves the final map.
    #[serde(default = "default_final_map_file_name")]
    pub final_map_file_name: String,

    /// ICP solver YAML; empty means solver defaults.
    #[serde(default)]
    pub icp_config: String,

    #[serde(default)]
    pub input_filters_config: String,

    #[serde(default)]
    pub input_filters_world_config: String,

    #[serde(default)]
    pub map_post_filters_config: String,

    #[serde(default = "default_map_update_condition")]
    pub map_update_condition: MapUpdateCondition,

    #[serde(default = "default_map_update_overlap")]
    pub map_update_overlap: f32,

    #[serde(default = "default_map_update_delay")]
    pub map_update_delay: f32,

    #[serde(default = "default_map_update_distance")]
    pub map_update_distance: f32,

    #[serde(default = "default_map_publish_rate")]
    pub map_publish_rate: f32,

    #[serde(default = "default_map_tf_publish_rate")]
    pub map_tf_publish_rate: f32,

    /// Offline only: seconds without a processed observation before the
    /// final map is saved and shutdown begins.
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time: f32,

    #[serde(default = "default_min_dist_new_point")]
    pub min_dist_new_point: f32,

    #[serde(default = "default_sensor_max_range")]
    pub sensor_max_range: f32,

    #[serde(default = "default_prior_dynamic")]
    pub prior_dynamic: f32,

    #[serde(default = "default_threshold_dynamic")]
    pub threshold_dynamic: f32,

    #[serde(default = "default_beam_half_angle")]
    pub beam_half_angle: f32,

    #[serde(default = "default_epsilon_a")]
    pub epsilon_a: f32,

    #[serde(default = "default_epsilon_d")]
    pub epsilon_d: f32,

    #[serde(default = "default_alpha")]
    pub alpha: f32,

    #[serde(default = "default_beta")]
    pub beta: f32,

    #[serde(default = "default_true")]
    pub is_3d: bool,

    #[serde(default = "default_true")]
    pub is_online: bool,

    #[serde(default)]
    pub compute_prob_dynamic: bool,

    #[serde(default = "default_true")]
    pub is_mapping: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes from defaults")
    }
}

impl MapperConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MapperError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    #[inline]
    pub fn euclidean_dim(&self) -> usize {
        if self.is_3d {
            3
        } else {
            2
        }
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy {
            condition: self.map_update_condition,
            overlap_threshold: self.map_update_overlap,
            delay_secs: self.map_update_delay,
            distance: self.map_update_distance,
            is_mapping: self.is_mapping,
            is_online: self.is_online,
        }
    }

    pub fn dynamic_points_config(&self) -> DynamicPointsConfig {
        DynamicPointsConfig {
            prior_dynamic: self.prior_dynamic,
            threshold_dynamic: self.threshold_dynamic,
            beam_half_angle: self.beam_half_angle,
            epsilon_a: self.epsilon_a,
            epsilon_d: self.epsilon_d,
            alpha: self.alpha,
            beta: self.beta,
            sensor_max_range: self.sensor_max_range,
        }
    }

    /// Check every field; any violation is a fatal configuration error.
    pub fn validate(&self) -> Result<()> {
        if !self.initial_map_file_name.is_empty() {
            File::open(&self.initial_map_file_name).map_err(|_| {
                MapperError::Config(format!(
                    "Invalid initial map file: {}",
                    self.initial_map_file_name
                ))
            })?;
        }

        if !self.is_online {
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.final_map_file_name)
                .map_err(|_| {
                    MapperError::Config(format!(
                        "Invalid final map file: {}",
                        self.final_map_file_name
                    ))
                })?;
        }

        for (label, path) in [
            ("icp config", &self.icp_config),
            ("input filters config", &self.input_filters_config),
            (
                "input filters world config",
                &self.input_filters_world_config,
            ),
            ("map post filters config", &self.map_post_filters_config),
        ] {
            if !path.is_empty() {
                File::open(path).map_err(|_| {
                    MapperError::Config(format!("Invalid {} file: {}", label, path))
                })?;
            }
        }

        if !(0.0..=1.0).contains(&self.map_update_overlap) {
            return Err(MapperError::Config(format!(
                "Invalid map update overlap: {}",
                self.map_update_overlap
            )));
        }
        if self.map_update_delay < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid map update delay: {}",
                self.map_update_delay
            )));
        }
        if self.map_update_distance < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid map update distance: {}",
                self.map_update_distance
            )));
        }
        if self.map_publish_rate <= 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid map publish rate: {}",
                self.map_publish_rate
            )));
        }
        if self.map_tf_publish_rate <= 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid map tf publish rate: {}",
                self.map_tf_publish_rate
            )));
        }
        if !self.is_online && self.max_idle_time < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid max idle time: {}",
                self.max_idle_time
            )));
        }
        if self.min_dist_new_point < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid minimum distance of new point: {}",
                self.min_dist_new_point
            )));
        }
        if self.sensor_max_range < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid sensor max range: {}",
                self.sensor_max_range
            )));
        }
        if !(0.0..=1.0).contains(&self.prior_dynamic) {
            return Err(MapperError::Config(format!(
                "Invalid prior dynamic: {}",
                self.prior_dynamic
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold_dynamic) {
            return Err(MapperError::Config(format!(
                "Invalid threshold dynamic: {}",
                self.threshold_dynamic
            )));
        }
        if !(0.0..=std::f32::consts::FRAC_PI_2).contains(&self.beam_half_angle) {
            return Err(MapperError::Config(format!(
                "Invalid beam half angle: {}",
                self.beam_half_angle
            )));
        }
        if self.epsilon_a < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid epsilon a: {}",
                self.epsilon_a
            )));
        }
        if self.epsilon_d < 0.0 {
            return Err(MapperError::Config(format!(
                "Invalid epsilon d: {}",
                self.epsilon_d
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(MapperError::Config(format!("Invalid alpha: {}", self.alpha)));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(MapperError::Config(format!("Invalid beta: {}", self.beta)));
        }
        if !self.is_mapping && self.initial_map_file_name.is_empty() {
            return Err(MapperError::Config(
                "is_mapping is set to false, but no initial map file was specified".into(),
            ));
        }
        Ok(())
    }

    /// Parse the initial-map pose string.
    ///
    /// When no initial map file is named the string is not parsed at all
    /// and the pose is identity. Otherwise brackets are stripped, commas
    /// and semicolons become whitespace and exactly `(D+1)²` floats are
    /// read, row-major.
    pub fn parse_initial_map_pose(&self) -> Result<RigidTransform> {
        let dim = self.euclidean_dim();
        if self.initial_map_file_name.is_empty() {
            return Ok(RigidTransform::identity(dim));
        }

        let h = dim + 1;
        let cleaned: String = self
            .initial_map_pose
            .chars()
            .filter(|c| *c != '[' && *c != ']')
            .map(|c| if c == ',' || c == ';' { ' ' } else { c })
            .collect();

        let mut values = Vec::with_capacity(h * h);
        for token in cleaned.split_whitespace() {
            let value: f32 = token.parse().map_err(|_| {
                MapperError::Config(
                    "An error occurred while trying to parse the initial map pose".into(),
                )
            })?;
            values.push(value);
        }
        if values.len() < h * h {
            return Err(MapperError::Config(
                "An error occurred while trying to parse the initial map pose".into(),
            ));
        }
        if values.len() > h * h {
            return Err(MapperError::Config(
                "Invalid initial map pose dimension".into(),
            ));
        }

        RigidTransform::from_matrix(DMatrix::from_row_slice(h, h, &values))
    }
}
