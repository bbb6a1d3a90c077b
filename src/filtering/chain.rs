//! Config-driven filter chains.

use std::fs;
use std::path::Path;

use crate::core::types::PointCloud;
use crate::error::{MapperError, Result};

use super::filters::FilterSpec;

/// An ordered sequence of filters applied in place to a cloud.
///
/// Parsed from a YAML sequence of filter specs; an empty document or an
/// empty path yields the identity chain. Malformed YAML is a fatal error to
/// the caller of the load or reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<FilterSpec>,
}

impl FilterChain {
    /// Chain that leaves every cloud untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::identity());
        }
        let filters: Vec<FilterSpec> = serde_yaml::from_str(yaml)?;
        Ok(Self { filters })
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MapperError::Config(format!(
                "cannot read filter config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load from a path that may be empty, meaning "identity chain".
    pub fn from_optional_file(path: &str) -> Result<Self> {
        if path.is_empty() {
            Ok(Self::identity())
        } else {
            Self::from_yaml_file(path)
        }
    }

    /// Apply every filter, in order, to the given cloud.
    pub fn apply(&self, cloud: &mut PointCloud) {
        for filter in &self.filters {
            filter.apply(cloud);
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
