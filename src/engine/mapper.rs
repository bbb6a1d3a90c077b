//! The mapping engine: pose tracking and map rebuilds.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use kiddo::SquaredEuclidean;
use nalgebra::DMatrix;
use parking_lot::RwLock;

use crate::config::MapperConfig;
use crate::core::math::{metric_kdtree, metric_query};
use crate::core::types::{PointCloud, RigidTransform, SensorObservation, PROBABILITY_DYNAMIC};
use crate::error::{MapperError, Result};
use crate::filtering::{FilterPipelines, RadiusGate};
use crate::matching::{Aligner, IcpAligner, IcpConfig};

use super::dynamic_points::{update_dynamic_probabilities, DynamicPointsConfig};
use super::map_store::MapStore;
use super::update_policy::UpdatePolicy;

/// Everything a rebuild needs besides the clouds, cheap to move into the
/// detached rebuild thread.
#[derive(Clone)]
struct BuildParams {
    compute_prob_dynamic: bool,
    min_dist_new_point: f32,
    sensor_max_range: f32,
    dynamic: DynamicPointsConfig,
}

/// Orchestrates filtering, alignment, the update decision and rebuilds.
///
/// `process_input` is the synchronous tracking path, entered by a single
/// thread; rebuilds run either inline or as one detached thread at a time.
/// The sensor pose is written only by the tracking path, after alignment
/// completes.
pub struct Mapper {
    params: BuildParams,
    policy: UpdatePolicy,
    is_online: bool,
    pipelines: Arc<RwLock<FilterPipelines>>,
    map_store: Arc<MapStore>,
    radius_gate: RadiusGate,
    sensor_pose: RigidTransform,
    last_update_stamp_us: u64,
    last_update_pose: RigidTransform,
    rebuild: Option<JoinHandle<()>>,
}

impl Mapper {
    /// Build an engine with the point-to-point ICP aligner configured from
    /// the config's ICP YAML path.
    pub fn new(config: &MapperConfig) -> Result<Self> {
        let icp_config = IcpConfig::from_optional_file(&config.icp_config)?;
        Self::with_aligner(config, Box::new(IcpAligner::new(icp_config)))
    }

    /// Build an engine around an injected aligner.
    pub fn with_aligner(config: &MapperConfig, aligner: Box<dyn Aligner>) -> Result<Self> {
        let dim = config.euclidean_dim();
        let pipelines = Arc::new(RwLock::new(FilterPipelines::load(
            &config.input_filters_config,
            &config.input_filters_world_config,
            &config.map_post_filters_config,
        )?));
        let map_store = Arc::new(MapStore::new(
            dim,
            config.sensor_max_range,
            config.compute_prob_dynamic,
            aligner,
        ));
        Ok(Self {
            params: BuildParams {
                compute_prob_dynamic: config.compute_prob_dynamic,
                min_dist_new_point: config.min_dist_new_point,
                sensor_max_range: config.sensor_max_range,
                dynamic: config.dynamic_points_config(),
            },
            policy: config.update_policy(),
            is_online: config.is_online,
            pipelines,
            map_store,
            radius_gate: RadiusGate::new(config.sensor_max_range),
            sensor_pose: RigidTransform::identity(dim),
            last_update_stamp_us: 0,
            last_update_pose: RigidTransform::identity(dim),
            rebuild: None,
        })
    }

    /// Most recent corrected sensor-to-map pose.
    pub fn sensor_pose(&self) -> &RigidTransform {
        &self.sensor_pose
    }

    pub fn map_store(&self) -> &Arc<MapStore> {
        &self.map_store
    }

    pub fn pipelines(&self) -> &Arc<RwLock<FilterPipelines>> {
        &self.pipelines
    }

    /// Whether a detached rebuild is still running.
    pub fn rebuild_busy(&self) -> bool {
        self.rebuild.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Block until the in-flight rebuild (if any) commits.
    pub fn wait_for_rebuild(&mut self) {
        if let Some(handle) = self.rebuild.take() {
            if handle.join().is_err() {
                log::error!("Map rebuild thread panicked");
            }
        }
    }

    /// Track one observation: filter, align against the map, publish the
    /// corrected pose and possibly trigger a rebuild.
    ///
    /// Alignment failure is recoverable: it is logged and leaves the pose
    /// and the map untouched.
    pub fn process_input(&mut self, observation: SensorObservation) -> Result<()> {
        let SensorObservation {
            cloud: mut input,
            prior_sensor_pose,
            stamp_us,
        } = observation;

        let mut input_in_map = prior_sensor_pose.apply(&input);
        self.pipelines.read().input_world.apply(&mut input_in_map);

        // The world chain above must see the full cloud; only afterwards is
        // the sensor-frame copy clipped and filtered.
        self.radius_gate.in_place_filter(&mut input);
        self.pipelines.read().input.apply(&mut input);

        if self.map_store.is_empty() {
            self.sensor_pose = prior_sensor_pose;
            self.update_map(input_in_map, stamp_us)?;
            return Ok(());
        }

        let (correction, overlap) = match self.map_store.align(&input_in_map) {
            Ok(aligned) => aligned,
            Err(e) => {
                log::warn!("Alignment failed, keeping previous pose: {}", e);
                return Ok(());
            }
        };
        self.sensor_pose = correction.compose(&prior_sensor_pose);

        if self.policy.should_update(
            stamp_us,
            self.last_update_stamp_us,
            &self.sensor_pose,
            &self.last_update_pose,
            overlap,
            self.rebuild_busy(),
        ) {
            self.update_map(correction.apply(&input_in_map), stamp_us)?;
        }
        Ok(())
    }

    /// Rebuild the map around `new_points`, asynchronously when online.
    fn update_map(&mut self, new_points: PointCloud, stamp_us: u64) -> Result<()> {
        self.last_update_stamp_us = stamp_us;
        self.last_update_pose = self.sensor_pose.clone();

        let prior_map = self.map_store.get_map();
        let rebuild_pose = self.sensor_pose.clone();

        if self.is_online && !self.map_store.is_empty() {
            let params = self.params.clone();
            let map_store = Arc::clone(&self.map_store);
            let pipelines = Arc::clone(&self.pipelines);
            let handle = thread::Builder::new()
                .name("map-builder".into())
                .spawn(move || {
                    if let Err(e) =
                        build_map(new_points, prior_map, rebuild_pose, &params, &map_store, &pipelines)
                    {
                        log::error!("Fatal error while rebuilding the map: {}", e);
                        std::process::exit(1);
                    }
                })
                .map_err(|e| MapperError::Map(format!("cannot spawn rebuild thread: {}", e)))?;
            self.rebuild = Some(handle);
            Ok(())
        } else {
            build_map(
                new_points,
                prior_map,
                rebuild_pose,
                &self.params,
                &self.map_store,
                &self.pipelines,
            )
        }
    }
}

impl Drop for Mapper {
    fn drop(&mut self) {
        self.wait_for_rebuild();
    }
}

/// Merge freshly observed points into the prior map, refresh dynamic
/// probabilities, post-filter in the sensor frame and commit the result.
fn build_map(
    mut new_points: PointCloud,
    mut prior_map: PointCloud,
    rebuild_pose: RigidTransform,
    params: &BuildParams,
    map_store: &MapStore,
    pipelines: &RwLock<FilterPipelines>,
) -> Result<()> {
    if params.compute_prob_dynamic {
        let prior = DMatrix::from_element(1, new_points.nb_points(), params.dynamic.prior_dynamic);
        new_points.add_descriptor(PROBABILITY_DYNAMIC, prior)?;
    }

    let mut map = if prior_map.is_empty() {
        new_points
    } else {
        if params.compute_prob_dynamic {
            update_dynamic_probabilities(
                &new_points,
                &mut prior_map,
                &rebuild_pose,
                &params.dynamic,
            )?;
        }
        let fresh = retrieve_points_further_than_min_dist_new_point(
            &new_points,
            &prior_map,
            &rebuild_pose,
            params.min_dist_new_point,
            params.sensor_max_range,
        );
        prior_map.concatenate(&fresh);
        prior_map
    };

    let mut map_in_sensor_frame = rebuild_pose.inverse().apply(&map);
    pipelines.read().map_post.apply(&mut map_in_sensor_frame);
    map = rebuild_pose.apply(&map_in_sensor_frame);

    map_store.set_map(map, &rebuild_pose)
}

/// Subset of `input` far enough from the radius-gated local map to be worth
/// inserting: every returned point's squared distance to its nearest gated
/// map point strictly exceeds `min_dist_new_point²`.
pub fn retrieve_points_further_than_min_dist_new_point(
    input: &PointCloud,
    map: &PointCloud,
    sensor_pose: &RigidTransform,
    min_dist_new_point: f32,
    sensor_max_range: f32,
) -> PointCloud {
    let gate = RadiusGate::new(sensor_max_range);
    let mut local_map = sensor_pose.inverse().apply(map);
    gate.in_place_filter(&mut local_map);
    let local_map = sensor_pose.apply(&local_map);
    if local_map.is_empty() {
        return input.clone();
    }

    let tree = metric_kdtree(&local_map);
    let min_dist_sq = min_dist_new_point * min_dist_new_point;

    let mut good_points = input.create_similar_empty(input.nb_points());
    let mut good_count = 0;
    for i in 0..input.nb_points() {
        let nearest = tree.nearest_one::<SquaredEuclidean>(&metric_query(&input.point(i)));
        if nearest.distance > min_dist_sq {
            good_points.set_col_from(good_count, input, i);
            good_count += 1;
        }
    }
    good_points.conservative_resize(good_count);
    good_points
}
