//! Shared ownership of the global map and the aligner reference.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::types::{PointCloud, RigidTransform, NORMALS};
use crate::error::{MapperError, Result};
use crate::filtering::RadiusGate;
use crate::matching::{Aligner, IcpConfig};

struct Shared {
    map: PointCloud,
    new_map_available: bool,
    last_published_sensor_pose: RigidTransform,
}

/// Owns the global point-cloud map and the ICP reference derived from it.
///
/// Concurrent access comes from the tracking thread (`align`), the rebuild
/// task (`set_map`) and the map publisher (`get_new_map`). The map lock and
/// the aligner lock are disjoint critical sections and are never nested.
pub struct MapStore {
    shared: Mutex<Shared>,
    aligner: Mutex<Box<dyn Aligner>>,
    radius_gate: RadiusGate,
    require_normals: bool,
    is_empty: AtomicBool,
}

impl MapStore {
    /// `require_normals` mirrors `compute_prob_dynamic`: when set, any map
    /// handed to [`MapStore::set_map`] must carry a `normals` descriptor.
    pub fn new(
        euclidean_dim: usize,
        sensor_max_range: f32,
        require_normals: bool,
        aligner: Box<dyn Aligner>,
    ) -> Self {
        Self {
            shared: Mutex::new(Shared {
                map: PointCloud::empty(euclidean_dim),
                new_map_available: false,
                last_published_sensor_pose: RigidTransform::identity(euclidean_dim),
            }),
            aligner: Mutex::new(aligner),
            radius_gate: RadiusGate::new(sensor_max_range),
            require_normals,
            is_empty: AtomicBool::new(true),
        }
    }

    /// Value-copy snapshot of the current map.
    pub fn get_map(&self) -> PointCloud {
        self.shared.lock().map.clone()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.is_empty.load(Ordering::SeqCst)
    }

    /// Pose at which the current aligner reference was carved.
    pub fn last_published_sensor_pose(&self) -> RigidTransform {
        self.shared.lock().last_published_sensor_pose.clone()
    }

    /// Install a new map: hand the radius-gated local view around
    /// `new_sensor_pose` to the aligner, then publish the full map.
    ///
    /// The aligner reference is the local view, not the whole map; this
    /// bounds alignment cost and rejects stale far-field structure.
    pub fn set_map(&self, new_map: PointCloud, new_sensor_pose: &RigidTransform) -> Result<()> {
        if self.require_normals && !new_map.has_descriptor(NORMALS) {
            return Err(MapperError::Map(
                "compute_prob_dynamic is enabled, but the map carries no normals descriptor"
                    .into(),
            ));
        }

        let mut local_view = new_sensor_pose.inverse().apply(&new_map);
        self.radius_gate.in_place_filter(&mut local_view);
        let reference = new_sensor_pose.apply(&local_view);

        {
            self.aligner.lock().set_reference(reference);
        }

        let empty = new_map.nb_points() == 0;
        {
            let mut shared = self.shared.lock();
            shared.map = new_map;
            shared.new_map_available = true;
            shared.last_published_sensor_pose = new_sensor_pose.clone();
        }
        self.is_empty.store(empty, Ordering::SeqCst);
        Ok(())
    }

    /// Consume the new-map flag: yields a snapshot exactly once per
    /// [`MapStore::set_map`].
    pub fn get_new_map(&self) -> Option<PointCloud> {
        let mut shared = self.shared.lock();
        if shared.new_map_available {
            shared.new_map_available = false;
            Some(shared.map.clone())
        } else {
            None
        }
    }

    /// Run the aligner on a reading, under the aligner lock.
    pub fn align(&self, reading: &PointCloud) -> Result<(RigidTransform, f32)> {
        let mut aligner = self.aligner.lock();
        let correction = aligner.align(reading)?;
        let overlap = aligner.overlap();
        Ok((correction, overlap))
    }

    /// Swap the aligner's solver parameters, keeping its reference.
    pub fn reconfigure_aligner(&self, config: IcpConfig) {
        self.aligner.lock().set_config(config);
    }
}
