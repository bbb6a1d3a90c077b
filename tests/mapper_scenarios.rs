//! End-to-end engine scenarios: cold start, growth policies, dynamic
//! points, alignment-failure isolation and randomized invariants.

mod common;

use common::{MockAligner, MockAlignerState};

use bhumi_mapper::{
    MapUpdateCondition, Mapper, MapperConfig, PointCloud, RigidTransform, SensorObservation,
    NORMALS, PROBABILITY_DYNAMIC,
};
use nalgebra::DMatrix;
use rand::Rng;

fn offline_3d_config() -> MapperConfig {
    let mut config = MapperConfig::default();
    config.is_online = false;
    config.min_dist_new_point = 0.01;
    config
}

fn observation_3d(points: &[[f32; 3]], prior: RigidTransform, stamp_us: u64) -> SensorObservation {
    SensorObservation::new(PointCloud::from_xyz(points), prior, stamp_us)
}

/// Cold start: the first observation seeds the map at the prior pose and
/// publishes exactly once.
#[test]
fn test_cold_start() {
    let state = MockAlignerState::shared(3);
    let mut mapper = Mapper::with_aligner(
        &offline_3d_config(),
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();

    let map = mapper.map_store().get_map();
    assert_eq!(map.nb_points(), 2);
    assert_eq!(map.point(0)[0], 1.0);
    assert_eq!(map.point(1)[0], 2.0);
    assert_eq!(
        mapper.sensor_pose().matrix(),
        RigidTransform::identity(3).matrix()
    );
    // Seeding never goes through the aligner.
    assert_eq!(state.lock().align_calls, 0);
    assert!(mapper.map_store().get_new_map().is_some());
    assert!(mapper.map_store().get_new_map().is_none());
}

/// Low overlap grows the map with the points beyond the merge gate.
#[test]
fn test_overlap_triggered_growth() {
    let state = MockAlignerState::shared(3);
    let mut mapper = Mapper::with_aligner(
        &offline_3d_config(),
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_some());

    state.lock().overlap = 0.5;
    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            1000,
        ))
        .unwrap();

    // (1,0,0) already sits on the map; only the far point is new.
    let map = mapper.map_store().get_map();
    assert_eq!(map.nb_points(), 3);
    assert_eq!(map.point(2)[0], 10.0);
    assert!(mapper.map_store().get_new_map().is_some());
}

/// Overlap above the threshold leaves the map alone.
#[test]
fn test_overlap_above_threshold_no_growth() {
    let state = MockAlignerState::shared(3);
    let mut mapper = Mapper::with_aligner(
        &offline_3d_config(),
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_some());

    state.lock().overlap = 0.95;
    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            1000,
        ))
        .unwrap();

    assert_eq!(mapper.map_store().get_map().nb_points(), 2);
    assert!(mapper.map_store().get_new_map().is_none());
    assert_eq!(state.lock().align_calls, 1);
}

/// Distance policy: no rebuild under the threshold, rebuild beyond it.
#[test]
fn test_distance_policy() {
    let state = MockAlignerState::shared(3);
    let mut config = offline_3d_config();
    config.map_update_condition = MapUpdateCondition::Distance;
    config.map_update_distance = 5.0;
    let mut mapper = Mapper::with_aligner(
        &config,
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_some());

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0]],
            RigidTransform::from_translation(&[4.0, 0.0, 0.0]),
            1000,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_none());

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0]],
            RigidTransform::from_translation(&[6.0, 0.0, 0.0]),
            2000,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_some());
}

/// Dynamic probability: free-space evidence crosses the threshold and the
/// point latches, end to end through the rebuild path.
#[test]
fn test_dynamic_probability_latch() {
    let dir = tempfile::tempdir().unwrap();
    let world_filters = dir.path().join("world.yaml");
    std::fs::write(&world_filters, "- filter: surface_normals\n  knn: 5\n").unwrap();

    let state = MockAlignerState::shared(3);
    let mut config = offline_3d_config();
    config.compute_prob_dynamic = true;
    config.input_filters_world_config = world_filters.to_string_lossy().into_owned();
    let mut mapper = Mapper::with_aligner(
        &config,
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    // Seed: a single wall point at (5,0,0); the world chain orients its
    // normal back toward the sensor.
    mapper
        .process_input(observation_3d(
            &[[5.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();
    let map = mapper.map_store().get_map();
    assert!(map.has_descriptor(NORMALS));
    assert_eq!(map.descriptor(PROBABILITY_DYNAMIC).unwrap()[(0, 0)], 0.6);

    // The same bearing now reads far behind the point: the wall moved away.
    state.lock().overlap = 0.5;
    mapper
        .process_input(observation_3d(
            &[[10.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            1000,
        ))
        .unwrap();
    let map = mapper.map_store().get_map();
    let prob = map.descriptor(PROBABILITY_DYNAMIC).unwrap()[(0, 0)];
    assert!(prob > 0.9, "free-space evidence should dominate, got {prob}");

    // Once past the threshold the point saturates.
    mapper
        .process_input(observation_3d(
            &[[10.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            2000,
        ))
        .unwrap();
    let map = mapper.map_store().get_map();
    let prob = map.descriptor(PROBABILITY_DYNAMIC).unwrap()[(0, 0)];
    assert!((prob - (1.0 - 1e-4)).abs() < 1e-5, "expected saturation, got {prob}");
}

/// Alignment failure leaves pose and map untouched and the engine keeps
/// accepting observations.
#[test]
fn test_alignment_failure_isolation() {
    let state = MockAlignerState::shared(3);
    let mut mapper = Mapper::with_aligner(
        &offline_3d_config(),
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            RigidTransform::identity(3),
            0,
        ))
        .unwrap();
    assert!(mapper.map_store().get_new_map().is_some());

    state.lock().fail = true;
    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0]],
            RigidTransform::from_translation(&[3.0, 0.0, 0.0]),
            1000,
        ))
        .unwrap();

    assert_eq!(
        mapper.sensor_pose().matrix(),
        RigidTransform::identity(3).matrix()
    );
    assert_eq!(mapper.map_store().get_map().nb_points(), 2);
    assert!(mapper.map_store().get_new_map().is_none());

    // Recovery: the next observation tracks normally.
    {
        let mut s = state.lock();
        s.fail = false;
        s.overlap = 0.95;
    }
    mapper
        .process_input(observation_3d(
            &[[1.0, 0.0, 0.0]],
            RigidTransform::from_translation(&[3.0, 0.0, 0.0]),
            2000,
        ))
        .unwrap();
    assert_eq!(mapper.sensor_pose().translation()[0], 3.0);
}

/// Randomized invariants: the published pose stays rigid and the map's
/// descriptor widths always match its point count.
#[test]
fn test_randomized_pose_and_descriptor_invariants() {
    let mut rng = rand::thread_rng();
    let state = MockAlignerState::shared(3);
    let mut config = offline_3d_config();
    config.map_update_overlap = 0.9;
    let mut mapper = Mapper::with_aligner(
        &config,
        Box::new(MockAligner {
            state: state.clone(),
        }),
    )
    .unwrap();

    for step in 0..30 {
        // Random small rigid correction reported by the aligner.
        let rotation = nalgebra::Rotation3::from_euler_angles(
            rng.gen_range(-0.2..0.2f32),
            rng.gen_range(-0.2..0.2f32),
            rng.gen_range(-0.2..0.2f32),
        );
        let mut matrix = DMatrix::identity(4, 4);
        matrix.view_mut((0, 0), (3, 3)).copy_from(rotation.matrix());
        for r in 0..3 {
            matrix[(r, 3)] = rng.gen_range(-0.5..0.5);
        }
        {
            let mut s = state.lock();
            s.correction = RigidTransform::from_matrix(matrix).unwrap();
            s.overlap = rng.gen_range(0.0..1.0f32);
        }

        let points: Vec<[f32; 3]> = (0..15)
            .map(|_| {
                [
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-2.0..2.0),
                ]
            })
            .collect();
        let prior = RigidTransform::from_translation(&[
            rng.gen_range(-3.0..3.0),
            rng.gen_range(-3.0..3.0),
            0.0,
        ]);
        mapper
            .process_input(observation_3d(&points, prior, step * 1000))
            .unwrap();

        assert!(
            mapper.sensor_pose().is_rigid(1e-4),
            "pose lost rigidity at step {step}"
        );

        let map = mapper.map_store().get_map();
        assert_eq!(mapper.map_store().is_empty(), map.nb_points() == 0);
        for d in map.descriptors() {
            assert_eq!(d.values.ncols(), map.nb_points());
        }
    }
}
