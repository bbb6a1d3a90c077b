//! Foundation types: clouds, transforms, observations.

pub mod observation;
pub mod point_cloud;
pub mod transform;

pub use observation::SensorObservation;
pub use point_cloud::{Descriptor, PointCloud, NORMALS, PROBABILITY_DYNAMIC};
pub use transform::RigidTransform;
