//! Individual point-cloud filters.
//!
//! Each filter is a serde-tagged spec so chains can be described in YAML:
//!
//! ```yaml
//! - filter: distance_limit
//!   max_dist: 40.0
//! - filter: surface_normals
//!   knn: 10
//! ```

use std::collections::HashSet;

use kiddo::SquaredEuclidean;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use serde::Deserialize;

use crate::core::math::{metric_kdtree, metric_query};
use crate::core::types::{PointCloud, NORMALS};

fn default_keep_inside() -> bool {
    true
}

fn default_normals_knn() -> usize {
    10
}

/// One configured filter of a [`FilterChain`](super::FilterChain).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Drop points beyond `max_dist` of the frame origin (or within it,
    /// when `keep_inside` is false).
    DistanceLimit {
        max_dist: f32,
        #[serde(default = "default_keep_inside")]
        keep_inside: bool,
    },

    /// Bernoulli subsampling: keep each point with probability `keep_ratio`.
    RandomSampling { keep_ratio: f32 },

    /// Keep the first point of every occupied voxel of side `voxel_size`.
    VoxelGrid { voxel_size: f32 },

    /// Estimate per-point surface normals by PCA over the `knn` nearest
    /// neighbors, oriented toward the frame origin. Adds the `normals`
    /// descriptor.
    SurfaceNormals {
        #[serde(default = "default_normals_knn")]
        knn: usize,
    },
}

impl FilterSpec {
    pub fn apply(&self, cloud: &mut PointCloud) {
        match *self {
            FilterSpec::DistanceLimit {
                max_dist,
                keep_inside,
            } => distance_limit(cloud, max_dist, keep_inside),
            FilterSpec::RandomSampling { keep_ratio } => random_sampling(cloud, keep_ratio),
            FilterSpec::VoxelGrid { voxel_size } => voxel_grid(cloud, voxel_size),
            FilterSpec::SurfaceNormals { knn } => surface_normals(cloud, knn),
        }
    }
}

fn distance_limit(cloud: &mut PointCloud, max_dist: f32, keep_inside: bool) {
    let kept: Vec<usize> = (0..cloud.nb_points())
        .filter(|&i| {
            let inside = cloud.point(i).norm() <= max_dist;
            inside == keep_inside
        })
        .collect();
    cloud.keep_columns(&kept);
}

fn random_sampling(cloud: &mut PointCloud, keep_ratio: f32) {
    let mut rng = rand::thread_rng();
    let kept: Vec<usize> = (0..cloud.nb_points())
        .filter(|_| rng.gen::<f32>() < keep_ratio)
        .collect();
    cloud.keep_columns(&kept);
}

fn voxel_grid(cloud: &mut PointCloud, voxel_size: f32) {
    if voxel_size <= 0.0 {
        return;
    }
    let is_3d = cloud.euclidean_dim() == 3;
    let mut seen: HashSet<(i64, i64, i64)> = HashSet::new();
    let mut kept = Vec::new();
    for i in 0..cloud.nb_points() {
        let p = cloud.point(i);
        let key = (
            (p[0] / voxel_size).floor() as i64,
            (p[1] / voxel_size).floor() as i64,
            if is_3d {
                (p[2] / voxel_size).floor() as i64
            } else {
                0
            },
        );
        if seen.insert(key) {
            kept.push(i);
        }
    }
    cloud.keep_columns(&kept);
}

fn surface_normals(cloud: &mut PointCloud, knn: usize) {
    let n = cloud.nb_points();
    let dim = cloud.euclidean_dim();
    if n == 0 {
        let _ = cloud.add_descriptor(NORMALS, DMatrix::zeros(dim, 0));
        return;
    }

    let tree = metric_kdtree(cloud);
    let mut normals = DMatrix::zeros(dim, n);
    for i in 0..n {
        let p = cloud.point(i);
        let neighbors = tree.nearest_n::<SquaredEuclidean>(&metric_query(&p), knn.max(dim + 1));
        let normal = if neighbors.len() <= dim {
            fallback_normal(&p, dim)
        } else {
            let mut mean = DVector::zeros(dim);
            for nb in &neighbors {
                mean += cloud.point(nb.item as usize);
            }
            mean /= neighbors.len() as f32;

            let mut covariance = DMatrix::zeros(dim, dim);
            for nb in &neighbors {
                let centered = cloud.point(nb.item as usize) - &mean;
                covariance += &centered * centered.transpose();
            }

            let eigen = SymmetricEigen::new(covariance);
            let mut min_idx = 0;
            for k in 1..dim {
                if eigen.eigenvalues[k] < eigen.eigenvalues[min_idx] {
                    min_idx = k;
                }
            }
            let candidate = eigen.eigenvectors.column(min_idx).into_owned();
            if candidate.norm() > 0.0 {
                candidate
            } else {
                fallback_normal(&p, dim)
            }
        };

        // Orient toward the frame origin (the sensor).
        let oriented = if normal.dot(&p) > 0.0 { -normal } else { normal };
        normals.set_column(i, &oriented);
    }

    let _ = cloud.add_descriptor(NORMALS, normals);
}

fn fallback_normal(p: &DVector<f32>, dim: usize) -> DVector<f32> {
    let norm = p.norm();
    if norm > 0.0 {
        -(p / norm)
    } else {
        let mut v = DVector::zeros(dim);
        v[0] = 1.0;
        v
    }
}
