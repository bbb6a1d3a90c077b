//! Timestamped sensor observations.

use super::point_cloud::PointCloud;
use super::transform::RigidTransform;

/// One range-sensor observation, consumed once by the mapping engine.
///
/// The cloud is expressed in the sensor frame; `prior_sensor_pose` is the
/// odometry-derived sensor-to-map transform at `stamp_us` (microseconds on
/// the steady monotonic clock).
#[derive(Debug, Clone)]
pub struct SensorObservation {
    pub cloud: PointCloud,
    pub prior_sensor_pose: RigidTransform,
    pub stamp_us: u64,
}

impl SensorObservation {
    pub fn new(cloud: PointCloud, prior_sensor_pose: RigidTransform, stamp_us: u64) -> Self {
        Self {
            cloud,
            prior_sensor_pose,
            stamp_us,
        }
    }
}
