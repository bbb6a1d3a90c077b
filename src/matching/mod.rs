//! Rigid alignment of observations against the map.

pub mod icp;

pub use icp::{IcpAligner, IcpConfig};

use crate::core::types::{PointCloud, RigidTransform};
use crate::error::Result;

/// Rigid-transform aligner seam.
///
/// The reading handed to [`Aligner::align`] is already expressed in the
/// reference frame (the prior pose has been applied); the returned
/// correction is applied multiplicatively on the left of the prior.
/// Alignment failure is recoverable: the engine keeps its previous pose and
/// skips the map update.
pub trait Aligner: Send {
    /// Replace the reference cloud subsequent alignments run against.
    fn set_reference(&mut self, reference: PointCloud);

    /// Align `reading` onto the reference, returning the correction.
    fn align(&mut self, reading: &PointCloud) -> Result<RigidTransform>;

    /// Fraction of reading points with an accepted correspondence in the
    /// last successful alignment, in [0, 1].
    fn overlap(&self) -> f32;

    /// Swap solver parameters, keeping the current reference.
    fn set_config(&mut self, _config: IcpConfig) {}
}
