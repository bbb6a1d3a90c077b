//! Point-to-point ICP aligner.
//!
//! Iteratively matches reading points to their nearest reference neighbors
//! through a k-d tree, estimates the optimal rigid transform in closed form
//! (Kabsch), and composes the increments until they fall below the
//! configured epsilons. Valid for 2-D and 3-D clouds.

use std::fs;
use std::path::Path;

use kiddo::SquaredEuclidean;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;

use crate::core::math::{metric_kdtree, metric_query, Kdtree3};
use crate::core::types::{PointCloud, RigidTransform};
use crate::error::{MapperError, Result};

use super::Aligner;

/// Solver parameters, loadable from a YAML file. Missing fields take their
/// defaults, so partial documents are valid.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IcpConfig {
    /// Maximum number of match/estimate iterations.
    pub max_iterations: u32,

    /// Converged when the incremental translation falls below this (meters).
    pub translation_epsilon: f32,

    /// Converged when the incremental rotation falls below this (radians).
    pub rotation_epsilon: f32,

    /// Point pairs farther apart than this are rejected (meters).
    pub max_correspondence_distance: f32,

    /// Fail the alignment when fewer pairs than this survive.
    pub min_correspondences: usize,

    /// Fraction of the worst correspondences discarded each iteration.
    pub outlier_ratio: f32,

    /// Mean squared residual above which an iteration-capped solve is
    /// reported as divergence.
    pub max_residual_mse: f32,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            translation_epsilon: 0.001,
            rotation_epsilon: 0.001,
            max_correspondence_distance: 0.5,
            min_correspondences: 6,
            outlier_ratio: 0.1,
            max_residual_mse: 0.01,
        }
    }
}

impl IcpConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MapperError::Config(format!("cannot read ICP config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load from a path that may be empty, meaning "solver defaults".
    pub fn from_optional_file(path: &str) -> Result<Self> {
        if path.is_empty() {
            Ok(Self::default())
        } else {
            Self::from_yaml_file(path)
        }
    }
}

struct Reference {
    cloud: PointCloud,
    tree: Kdtree3,
}

/// Point-to-point ICP implementation of the [`Aligner`] seam.
pub struct IcpAligner {
    config: IcpConfig,
    reference: Option<Reference>,
    last_overlap: f32,
}

impl IcpAligner {
    pub fn new(config: IcpConfig) -> Self {
        Self {
            config,
            reference: None,
            last_overlap: 0.0,
        }
    }

    pub fn config(&self) -> &IcpConfig {
        &self.config
    }
}

impl Aligner for IcpAligner {
    fn set_reference(&mut self, reference: PointCloud) {
        self.reference = Some(Reference {
            tree: metric_kdtree(&reference),
            cloud: reference,
        });
    }

    fn align(&mut self, reading: &PointCloud) -> Result<RigidTransform> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| MapperError::Alignment("no reference cloud set".into()))?;
        let (correction, overlap) = solve(&self.config, reference, reading)?;
        self.last_overlap = overlap;
        Ok(correction)
    }

    fn overlap(&self) -> f32 {
        self.last_overlap
    }

    fn set_config(&mut self, config: IcpConfig) {
        self.config = config;
    }
}

fn solve(
    config: &IcpConfig,
    reference: &Reference,
    reading: &PointCloud,
) -> Result<(RigidTransform, f32)> {
    if reading.is_empty() || reference.cloud.is_empty() {
        return Err(MapperError::Alignment(
            "empty reading or reference cloud".into(),
        ));
    }

    let dim = reading.euclidean_dim();
    let mut current = RigidTransform::identity(dim);
    let mut last_mse = f32::MAX;

    for _ in 0..config.max_iterations {
        let mut correspondences = find_correspondences(config, reference, reading, &current);
        let matched = correspondences.len();
        trim_outliers(config, &mut correspondences);
        if correspondences.len() < config.min_correspondences {
            return Err(MapperError::Alignment(format!(
                "only {} correspondences (minimum {})",
                correspondences.len(),
                config.min_correspondences
            )));
        }

        let delta = rigid_from_correspondences(reference, reading, &correspondences, &current);
        current = delta.compose(&current);

        let mse = mean_squared_residual(reference, reading, &correspondences, &current);
        if delta.translation().norm() < config.translation_epsilon
            && rotation_angle(&delta) < config.rotation_epsilon
        {
            let overlap = matched as f32 / reading.nb_points() as f32;
            return Ok((current, overlap));
        }
        if mse > last_mse * 1.1 {
            return Err(MapperError::Alignment(format!(
                "residual error diverging ({:.6} after {:.6})",
                mse, last_mse
            )));
        }
        last_mse = mse;
    }

    // Out of iterations; accept only a tight residual.
    let correspondences = find_correspondences(config, reference, reading, &current);
    let mse = mean_squared_residual(reference, reading, &correspondences, &current);
    if mse < config.max_residual_mse {
        let overlap = correspondences.len() as f32 / reading.nb_points() as f32;
        Ok((current, overlap))
    } else {
        Err(MapperError::Alignment(format!(
            "no convergence after {} iterations (residual {:.6})",
            config.max_iterations, mse
        )))
    }
}

/// (reading index, reference index, squared distance) for every reading
/// point whose nearest reference neighbor is within the acceptance radius.
fn find_correspondences(
    config: &IcpConfig,
    reference: &Reference,
    reading: &PointCloud,
    current: &RigidTransform,
) -> Vec<(usize, usize, f32)> {
    let max_dist_sq = config.max_correspondence_distance * config.max_correspondence_distance;
    let mut correspondences = Vec::with_capacity(reading.nb_points());
    for i in 0..reading.nb_points() {
        let p = current.transform_point(&reading.point(i));
        let nearest = reference.tree.nearest_one::<SquaredEuclidean>(&metric_query(&p));
        if nearest.distance <= max_dist_sq {
            correspondences.push((i, nearest.item as usize, nearest.distance));
        }
    }
    correspondences
}

fn trim_outliers(config: &IcpConfig, correspondences: &mut Vec<(usize, usize, f32)>) {
    if config.outlier_ratio <= 0.0 || correspondences.is_empty() {
        return;
    }
    correspondences.sort_by(|a, b| a.2.total_cmp(&b.2));
    let keep = ((1.0 - config.outlier_ratio) * correspondences.len() as f32) as usize;
    correspondences.truncate(keep.max(config.min_correspondences));
}

/// Closed-form rigid estimate (Kabsch) from the matched pairs, evaluated at
/// the current transform. Returns the incremental correction.
fn rigid_from_correspondences(
    reference: &Reference,
    reading: &PointCloud,
    correspondences: &[(usize, usize, f32)],
    current: &RigidTransform,
) -> RigidTransform {
    let dim = reading.euclidean_dim();
    if correspondences.len() < dim {
        return RigidTransform::identity(dim);
    }

    let n = correspondences.len() as f32;
    let mut src_centroid = DVector::zeros(dim);
    let mut tgt_centroid = DVector::zeros(dim);
    for &(ri, ti, _) in correspondences {
        src_centroid += current.transform_point(&reading.point(ri));
        tgt_centroid += reference.cloud.point(ti);
    }
    src_centroid /= n;
    tgt_centroid /= n;

    let mut cross_covariance = DMatrix::zeros(dim, dim);
    for &(ri, ti, _) in correspondences {
        let s = current.transform_point(&reading.point(ri)) - &src_centroid;
        let t = reference.cloud.point(ti) - &tgt_centroid;
        cross_covariance += &s * t.transpose();
    }

    let svd = cross_covariance.svd(true, true);
    let u = svd.u.expect("SVD of cross-covariance");
    let v = svd.v_t.expect("SVD of cross-covariance").transpose();
    let mut rotation = &v * u.transpose();
    if rotation.determinant() < 0.0 {
        let mut v = v;
        let last = dim - 1;
        for i in 0..dim {
            v[(i, last)] = -v[(i, last)];
        }
        rotation = &v * u.transpose();
    }
    let translation = &tgt_centroid - &rotation * &src_centroid;

    let mut matrix = DMatrix::identity(dim + 1, dim + 1);
    matrix.view_mut((0, 0), (dim, dim)).copy_from(&rotation);
    matrix.view_mut((0, dim), (dim, 1)).copy_from(&translation);
    RigidTransform::from_matrix(matrix).expect("well-formed rigid estimate")
}

fn mean_squared_residual(
    reference: &Reference,
    reading: &PointCloud,
    correspondences: &[(usize, usize, f32)],
    current: &RigidTransform,
) -> f32 {
    if correspondences.is_empty() {
        return f32::MAX;
    }
    let mut sum = 0.0;
    for &(ri, ti, _) in correspondences {
        let p = current.transform_point(&reading.point(ri));
        sum += (p - reference.cloud.point(ti)).norm_squared();
    }
    sum / correspondences.len() as f32
}

fn rotation_angle(t: &RigidTransform) -> f32 {
    let m = t.matrix();
    if t.euclidean_dim() == 2 {
        m[(1, 0)].atan2(m[(0, 0)]).abs()
    } else {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];
        ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
    }
}
