//! Config-driven point-cloud filtering.

pub mod chain;
pub mod filters;
pub mod radius_gate;

pub use chain::FilterChain;
pub use filters::FilterSpec;
pub use radius_gate::RadiusGate;

use crate::error::Result;

/// The three reloadable filter chains of the engine.
///
/// `input` runs on each observation in the sensor frame, `input_world` on
/// the observation lifted into the map frame, `map_post` on the whole map
/// in the sensor frame after each rebuild.
#[derive(Debug, Clone, Default)]
pub struct FilterPipelines {
    pub input: FilterChain,
    pub input_world: FilterChain,
    pub map_post: FilterChain,
}

impl FilterPipelines {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Load all three chains; empty paths yield identity chains.
    pub fn load(input_path: &str, input_world_path: &str, map_post_path: &str) -> Result<Self> {
        Ok(Self {
            input: FilterChain::from_optional_file(input_path)?,
            input_world: FilterChain::from_optional_file(input_world_path)?,
            map_post: FilterChain::from_optional_file(map_post_path)?,
        })
    }
}
