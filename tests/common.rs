//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use bhumi_mapper::{
    Aligner, MapSink, MapperError, OdometrySink, PointCloud, Result, RigidTransform, TfSink,
    TransformTree,
};

/// Scriptable aligner: the test owns the state and can change the returned
/// correction, the reported overlap, or force failures between calls.
pub struct MockAlignerState {
    pub correction: RigidTransform,
    pub overlap: f32,
    pub fail: bool,
    pub align_calls: usize,
    pub references_set: usize,
}

impl MockAlignerState {
    pub fn shared(euclidean_dim: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            correction: RigidTransform::identity(euclidean_dim),
            overlap: 1.0,
            fail: false,
            align_calls: 0,
            references_set: 0,
        }))
    }
}

pub struct MockAligner {
    pub state: Arc<Mutex<MockAlignerState>>,
}

impl Aligner for MockAligner {
    fn set_reference(&mut self, _reference: PointCloud) {
        self.state.lock().references_set += 1;
    }

    fn align(&mut self, _reading: &PointCloud) -> Result<RigidTransform> {
        let mut state = self.state.lock();
        state.align_calls += 1;
        if state.fail {
            Err(MapperError::Alignment("mock divergence".into()))
        } else {
            Ok(state.correction.clone())
        }
    }

    fn overlap(&self) -> f32 {
        self.state.lock().overlap
    }
}

/// Transform tree returning fixed transforms, with scriptable per-stamp
/// lookup failures.
pub struct MockTransformTree {
    pub sensor_to_odom: RigidTransform,
    pub robot_to_sensor: RigidTransform,
    pub failing_stamps: Mutex<HashSet<u64>>,
}

impl MockTransformTree {
    pub fn identity(euclidean_dim: usize) -> Self {
        Self {
            sensor_to_odom: RigidTransform::identity(euclidean_dim),
            robot_to_sensor: RigidTransform::identity(euclidean_dim),
            failing_stamps: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_at(&self, stamp_us: u64) {
        self.failing_stamps.lock().insert(stamp_us);
    }
}

impl TransformTree for MockTransformTree {
    fn lookup(
        &self,
        source_frame: &str,
        _target_frame: &str,
        stamp_us: u64,
        _timeout: Duration,
    ) -> Result<RigidTransform> {
        if self.failing_stamps.lock().contains(&stamp_us) {
            return Err(MapperError::Transform(format!(
                "no transform for {} at {}",
                source_frame, stamp_us
            )));
        }
        if source_frame == "base_link" {
            Ok(self.robot_to_sensor.clone())
        } else {
            Ok(self.sensor_to_odom.clone())
        }
    }
}

/// Records every published odometry pose.
#[derive(Clone, Default)]
pub struct RecordingOdomSink {
    pub published: Arc<Mutex<Vec<(Vec<f32>, u64)>>>,
}

impl OdometrySink for RecordingOdomSink {
    fn publish_odometry(&mut self, robot_to_map: &RigidTransform, stamp_us: u64) {
        let t = robot_to_map.translation();
        self.published
            .lock()
            .push((t.iter().copied().collect(), stamp_us));
    }
}

/// Records the point count of every published map.
#[derive(Clone, Default)]
pub struct RecordingMapSink {
    pub published: Arc<Mutex<Vec<usize>>>,
}

impl MapSink for RecordingMapSink {
    fn publish_map(&mut self, map: &PointCloud) {
        self.published.lock().push(map.nb_points());
    }
}

/// Records every broadcast odom-to-map correction.
#[derive(Clone, Default)]
pub struct RecordingTfSink {
    pub broadcasts: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl TfSink for RecordingTfSink {
    fn broadcast_odom_to_map(&mut self, odom_to_map: &RigidTransform) {
        self.broadcasts
            .lock()
            .push(odom_to_map.translation().iter().copied().collect());
    }
}

/// Grid of points on a wall, enough for ICP to chew on.
pub fn wall_cloud_2d(n: usize) -> PointCloud {
    let points: Vec<[f32; 2]> = (0..n)
        .map(|i| [2.0, i as f32 * 0.05 + 0.0001 * i as f32])
        .collect();
    PointCloud::from_xy(&points)
}
