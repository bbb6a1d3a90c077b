//! Mapping engine: map store, update policy, dynamic points, orchestrator.

pub mod dynamic_points;
pub mod map_store;
pub mod mapper;
pub mod update_policy;

pub use dynamic_points::{update_dynamic_probabilities, DynamicPointsConfig};
pub use map_store::MapStore;
pub use mapper::{retrieve_points_further_than_min_dist_new_point, Mapper};
pub use update_policy::{MapUpdateCondition, UpdatePolicy};
