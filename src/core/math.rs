//! Math helpers shared across the engine.

use crate::core::types::PointCloud;

/// k-d tree type for 3-axis queries with a bucket size large enough to hold
/// point clouds containing many coincident coordinates on one axis (e.g.
/// flat walls or floors, where many points share the same z).
pub type Kdtree3 = kiddo::float::kdtree::KdTree<f32, u64, 3, 4096, u32>;

/// Spherical coordinates of every point of a cloud, in its current frame.
///
/// Returns per-point radii and (elevation, azimuth) angle pairs. In 2-D the
/// elevation is 0; in 3-D it is `asin(z / r)`. Azimuth is `atan2(y, x)`.
pub fn spherical_coordinates(cloud: &PointCloud) -> (Vec<f32>, Vec<[f32; 2]>) {
    let n = cloud.nb_points();
    let is_3d = cloud.euclidean_dim() == 3;
    let mut radii = Vec::with_capacity(n);
    let mut angles = Vec::with_capacity(n);
    for i in 0..n {
        let p = cloud.point(i);
        let radius = p.norm();
        let elevation = if is_3d { (p[2] / radius).asin() } else { 0.0 };
        let azimuth = p[1].atan2(p[0]);
        radii.push(radius);
        angles.push([elevation, azimuth]);
    }
    (radii, angles)
}

/// k-d tree over the Euclidean coordinates of a cloud.
///
/// 2-D points are padded with z = 0, which leaves all pairwise distances
/// unchanged, so a single 3-axis tree serves both dimensions.
pub fn metric_kdtree(cloud: &PointCloud) -> Kdtree3 {
    let mut tree = Kdtree3::new();
    let is_3d = cloud.euclidean_dim() == 3;
    for i in 0..cloud.nb_points() {
        let p = cloud.point(i);
        let z = if is_3d { p[2] } else { 0.0 };
        tree.add(&[p[0], p[1], z], i as u64);
    }
    tree
}

/// Pad a Euclidean point to a 3-axis tree query.
pub fn metric_query(point: &nalgebra::DVector<f32>) -> [f32; 3] {
    let z = if point.len() == 3 { point[2] } else { 0.0 };
    [point[0], point[1], z]
}
