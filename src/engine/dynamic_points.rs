//! Per-point dynamic probability estimation.
//!
//! Matches the current observation to the local map through an angular
//! (spherical-coordinate) nearest-neighbor index and recursively updates
//! each matched map point's belief of being dynamic from the free-space
//! evidence the observation carries. A point whose probability crosses
//! `threshold_dynamic` is latched at `1 - eps`.

use kiddo::{KdTree, SquaredEuclidean};

use crate::core::math::spherical_coordinates;
use crate::core::types::{PointCloud, RigidTransform, NORMALS, PROBABILITY_DYNAMIC};
use crate::error::{MapperError, Result};

const EPS: f32 = 1e-4;

/// Parameters of the recursive estimator.
#[derive(Debug, Clone)]
pub struct DynamicPointsConfig {
    /// Probability assigned to newly inserted points.
    pub prior_dynamic: f32,
    /// Latching threshold.
    pub threshold_dynamic: f32,
    /// Half-angle of the sensor beam (radians); pairs farther apart than
    /// twice this angle are not matched.
    pub beam_half_angle: f32,
    /// Relative depth tolerance (fraction of the reading range).
    pub epsilon_a: f32,
    /// Absolute depth tolerance (meters).
    pub epsilon_d: f32,
    /// Static-to-static transition weight.
    pub alpha: f32,
    /// Dynamic-to-dynamic transition weight.
    pub beta: f32,
    /// Map points beyond this range of the sensor are not updated.
    pub sensor_max_range: f32,
}

/// Update `map`'s `probabilityDynamic` descriptor in place from one
/// observation.
///
/// Both clouds are in the map frame; `sensor_pose` locates the sensor that
/// produced `observation`. The map must carry `normals` and
/// `probabilityDynamic` descriptors.
pub fn update_dynamic_probabilities(
    observation: &PointCloud,
    map: &mut PointCloud,
    sensor_pose: &RigidTransform,
    config: &DynamicPointsConfig,
) -> Result<()> {
    if observation.is_empty() || map.is_empty() {
        return Ok(());
    }

    let sensor_from_map = sensor_pose.inverse();
    let observation_sf = sensor_from_map.apply(observation);
    let (_, observation_angles) = spherical_coordinates(&observation_sf);

    // Restrict the map to the sensor's range, remembering each survivor's
    // original column so the write-back hits the right point.
    let mut cut_map = sensor_from_map.apply(map);
    let global_id: Vec<usize> = (0..cut_map.nb_points())
        .filter(|&i| cut_map.point(i).norm() < config.sensor_max_range)
        .collect();
    cut_map.keep_columns(&global_id);
    if cut_map.is_empty() {
        return Ok(());
    }
    let (_, cut_map_angles) = spherical_coordinates(&cut_map);

    let normals = cut_map
        .descriptor(NORMALS)
        .ok_or_else(|| MapperError::Map("map carries no normals descriptor".into()))?;

    let mut angle_index: KdTree<f32, 2> = KdTree::new();
    for (i, angles) in observation_angles.iter().enumerate() {
        angle_index.add(angles, i as u64);
    }
    let max_angle = 2.0 * config.beam_half_angle;
    let max_angle_sq = max_angle * max_angle;

    // Borrow of the probability block on `map`; `cut_map` is an
    // independent copy, so reads below do not alias it.
    let probabilities = map
        .descriptor_mut(PROBABILITY_DYNAMIC)
        .ok_or_else(|| MapperError::Map("map carries no probabilityDynamic descriptor".into()))?;

    for i in 0..cut_map_angles.len() {
        let nearest = angle_index.nearest_one::<SquaredEuclidean>(&cut_map_angles[i]);
        if nearest.distance > max_angle_sq {
            continue;
        }

        let reading_point = observation_sf.point(nearest.item as usize);
        let map_point = cut_map.point(i);
        let reading_range = reading_point.norm();
        let map_range = map_point.norm();
        let delta = (&reading_point - &map_point).norm();
        let d_max = config.epsilon_a * reading_range;

        let normal = normals.column(i);
        let w_v = EPS + (1.0 - EPS) * normal.dot(&(map_point / map_range)).abs();
        let w_d1 = EPS + (1.0 - EPS) * (1.0 - nearest.distance.sqrt() / max_angle);

        let offset = delta - config.epsilon_d;
        let mut w_d2 = 1.0;
        if delta < config.epsilon_d || map_range > reading_range {
            w_d2 = EPS;
        } else if offset < d_max {
            w_d2 = EPS + (1.0 - EPS) * offset / d_max;
        }

        let mut w_p2 = EPS;
        if delta < config.epsilon_d {
            w_p2 = 1.0;
        } else if offset < d_max {
            w_p2 = EPS + (1.0 - EPS) * (1.0 - offset / d_max);
        }

        // Only update when the sensor could plausibly have seen through
        // this map point.
        if reading_range + config.epsilon_d + d_max >= map_range {
            let last_dyn = probabilities[(0, global_id[i])];
            let c1 = 1.0 - w_v * w_d1;
            let c2 = w_v * w_d1;

            let (prob_dynamic, prob_static) = if last_dyn < config.threshold_dynamic {
                (
                    c1 * last_dyn
                        + c2 * w_d2
                            * ((1.0 - config.alpha) * (1.0 - last_dyn) + config.beta * last_dyn),
                    c1 * (1.0 - last_dyn)
                        + c2 * w_p2
                            * (config.alpha * (1.0 - last_dyn)
                                + (1.0 - config.beta) * last_dyn),
                )
            } else {
                (1.0 - EPS, EPS)
            };

            probabilities[(0, global_id[i])] = prob_dynamic / (prob_dynamic + prob_static);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn config() -> DynamicPointsConfig {
        DynamicPointsConfig {
            prior_dynamic: 0.6,
            threshold_dynamic: 0.9,
            beam_half_angle: 0.01,
            epsilon_a: 0.01,
            epsilon_d: 0.01,
            alpha: 0.8,
            beta: 0.99,
            sensor_max_range: 80.0,
        }
    }

    /// Map with a single point at (5, 0) whose normal faces the sensor.
    fn one_point_map() -> PointCloud {
        let mut map = PointCloud::from_xy(&[[5.0, 0.0]]);
        map.add_descriptor(NORMALS, DMatrix::from_column_slice(2, 1, &[-1.0, 0.0]))
            .unwrap();
        map.add_descriptor(PROBABILITY_DYNAMIC, DMatrix::from_element(1, 1, 0.6))
            .unwrap();
        map
    }

    fn probability(map: &PointCloud) -> f32 {
        map.descriptor(PROBABILITY_DYNAMIC).unwrap()[(0, 0)]
    }

    #[test]
    fn test_consistent_observation_drives_probability_down() {
        let mut map = one_point_map();
        let observation = PointCloud::from_xy(&[[5.0, 0.0]]);
        let pose = RigidTransform::identity(2);

        let before = probability(&map);
        update_dynamic_probabilities(&observation, &mut map, &pose, &config()).unwrap();
        let after = probability(&map);
        assert!(after < before);
        assert!(after < 0.01, "static evidence should dominate, got {after}");
    }

    #[test]
    fn test_free_space_evidence_latches_point() {
        let mut map = one_point_map();
        // The beam passes through the map point and lands far behind it.
        let observation = PointCloud::from_xy(&[[10.0, 0.0]]);
        let pose = RigidTransform::identity(2);
        let cfg = config();

        update_dynamic_probabilities(&observation, &mut map, &pose, &cfg).unwrap();
        assert!(
            probability(&map) > cfg.threshold_dynamic,
            "see-through evidence should cross the threshold, got {}",
            probability(&map)
        );

        // Once above the threshold, the point saturates and stays there.
        update_dynamic_probabilities(&observation, &mut map, &pose, &cfg).unwrap();
        approx::assert_relative_eq!(probability(&map), 1.0 - EPS, epsilon = 1e-6);
        update_dynamic_probabilities(&observation, &mut map, &pose, &cfg).unwrap();
        approx::assert_relative_eq!(probability(&map), 1.0 - EPS, epsilon = 1e-6);
    }

    #[test]
    fn test_occluded_point_not_updated() {
        let mut map = one_point_map();
        // Reading well in front of the map point: the beam never reached it.
        let observation = PointCloud::from_xy(&[[2.0, 0.0]]);
        let pose = RigidTransform::identity(2);

        update_dynamic_probabilities(&observation, &mut map, &pose, &config()).unwrap();
        assert_eq!(probability(&map), 0.6);
    }

    #[test]
    fn test_angular_gate_skips_unrelated_points() {
        let mut map = one_point_map();
        // Observation far off the map point's bearing.
        let observation = PointCloud::from_xy(&[[0.0, 5.0]]);
        let pose = RigidTransform::identity(2);

        update_dynamic_probabilities(&observation, &mut map, &pose, &config()).unwrap();
        assert_eq!(probability(&map), 0.6);
    }

    #[test]
    fn test_out_of_range_map_points_skipped() {
        let mut map = one_point_map();
        let mut cfg = config();
        cfg.sensor_max_range = 4.0;
        let observation = PointCloud::from_xy(&[[10.0, 0.0]]);
        let pose = RigidTransform::identity(2);

        update_dynamic_probabilities(&observation, &mut map, &pose, &cfg).unwrap();
        assert_eq!(probability(&map), 0.6);
    }

    #[test]
    fn test_missing_descriptors_are_errors() {
        let pose = RigidTransform::identity(2);
        let observation = PointCloud::from_xy(&[[5.0, 0.0]]);

        let mut no_normals = PointCloud::from_xy(&[[5.0, 0.0]]);
        no_normals
            .add_descriptor(PROBABILITY_DYNAMIC, DMatrix::from_element(1, 1, 0.6))
            .unwrap();
        assert!(
            update_dynamic_probabilities(&observation, &mut no_normals, &pose, &config()).is_err()
        );

        let mut no_prob = PointCloud::from_xy(&[[5.0, 0.0]]);
        no_prob
            .add_descriptor(NORMALS, DMatrix::from_column_slice(2, 1, &[-1.0, 0.0]))
            .unwrap();
        assert!(
            update_dynamic_probabilities(&observation, &mut no_prob, &pose, &config()).is_err()
        );
    }

    #[test]
    fn test_3d_free_space_latch() {
        let mut map = PointCloud::from_xyz(&[[5.0, 0.0, 0.0]]);
        map.add_descriptor(
            NORMALS,
            DMatrix::from_column_slice(3, 1, &[-1.0, 0.0, 0.0]),
        )
        .unwrap();
        map.add_descriptor(PROBABILITY_DYNAMIC, DMatrix::from_element(1, 1, 0.6))
            .unwrap();

        let observation = PointCloud::from_xyz(&[[10.0, 0.0, 0.0]]);
        let pose = RigidTransform::identity(3);
        let cfg = config();

        update_dynamic_probabilities(&observation, &mut map, &pose, &cfg).unwrap();
        assert!(map.descriptor(PROBABILITY_DYNAMIC).unwrap()[(0, 0)] > cfg.threshold_dynamic);
    }
}
