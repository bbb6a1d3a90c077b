//! Error types for bhumi-mapper.

use thiserror::Error;

/// Crate-wide error type.
///
/// `Transform` and `Alignment` are per-observation and recoverable: the
/// tracking path logs them and drops the observation or keeps the previous
/// pose. The remaining variants are fatal at the boundary where they occur
/// (startup, reload, rebuild).
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Transform lookup failed: {0}")]
    Transform(String),

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Map error: {0}")]
    Map(String),
}

pub type Result<T> = std::result::Result<T, MapperError>;
