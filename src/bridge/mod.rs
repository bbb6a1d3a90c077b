//! Bridge between the engine and the robot framework.
//!
//! Wires the tracking loop, the map and transform publishers and the
//! offline idle supervisor around a [`Mapper`], against the transport
//! seams of [`crate::io::transport`]. Also hosts the control operations
//! (config reload, on-demand map save) and initial map loading.

pub mod publishers;
pub mod shutdown;
pub mod tracking;

pub use publishers::{MapPublisherThread, TfPublisherThread};
pub use shutdown::IdleShutdownThread;
pub use tracking::TrackingThread;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::MapperConfig;
use crate::core::types::RigidTransform;
use crate::engine::{Mapper, MapStore};
use crate::error::{MapperError, Result};
use crate::filtering::FilterPipelines;
use crate::io::map_file;
use crate::io::transport::{CloudSource, MapSink, OdometrySink, TfSink, TransformTree};
use crate::matching::IcpConfig;

/// Frame names used for TF lookups.
#[derive(Debug, Clone)]
pub struct FrameIds {
    pub odom: String,
    pub sensor: String,
    pub robot: String,
}

impl From<&MapperConfig> for FrameIds {
    fn from(config: &MapperConfig) -> Self {
        Self {
            odom: config.odom_frame.clone(),
            sensor: config.sensor_frame.clone(),
            robot: config.robot_frame.clone(),
        }
    }
}

/// State shared between the tracking thread and the publishers.
pub struct BridgeShared {
    /// Latched odom-to-map correction, re-projected rigid after every
    /// observation.
    pub odom_to_map: Mutex<RigidTransform>,
    /// Wall-clock instant of the last processed observation; drives the
    /// offline idle supervisor.
    pub last_input: Mutex<Option<Instant>>,
}

impl BridgeShared {
    pub fn new(euclidean_dim: usize) -> Self {
        Self {
            odom_to_map: Mutex::new(RigidTransform::identity(euclidean_dim)),
            last_input: Mutex::new(None),
        }
    }
}

/// Cloneable handle exposing the control operations.
#[derive(Clone)]
pub struct BridgeHandle {
    config: Arc<MapperConfig>,
    pipelines: Arc<RwLock<FilterPipelines>>,
    map_store: Arc<MapStore>,
}

impl BridgeHandle {
    pub fn new(
        config: Arc<MapperConfig>,
        pipelines: Arc<RwLock<FilterPipelines>>,
        map_store: Arc<MapStore>,
    ) -> Self {
        Self {
            config,
            pipelines,
            map_store,
        }
    }

    /// Re-read all four YAML configs and swap them in. Idempotent when the
    /// files are unchanged; a malformed file fails the reload and leaves
    /// the running chains untouched.
    pub fn reload_yaml_config(&self) -> Result<()> {
        let fresh = FilterPipelines::load(
            &self.config.input_filters_config,
            &self.config.input_filters_world_config,
            &self.config.map_post_filters_config,
        )?;
        let icp = IcpConfig::from_optional_file(&self.config.icp_config)?;
        *self.pipelines.write() = fresh;
        self.map_store.reconfigure_aligner(icp);
        Ok(())
    }

    /// Persist the current map. Failure is non-fatal to the engine.
    pub fn save_map<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        log::info!("Saving map to {}", path.as_ref().display());
        map_file::save(&self.map_store.get_map(), path)
    }

    pub fn map_store(&self) -> &Arc<MapStore> {
        &self.map_store
    }
}

/// Seed the store from the configured initial map file, if any.
///
/// The file is pre-transformed by the parsed initial pose and installed
/// with the identity sensor pose.
pub fn load_initial_map(config: &MapperConfig, map_store: &MapStore) -> Result<()> {
    if config.initial_map_file_name.is_empty() {
        return Ok(());
    }
    let initial_map = map_file::load(&config.initial_map_file_name)?;
    if initial_map.euclidean_dim() != config.euclidean_dim() {
        return Err(MapperError::Map(format!(
            "Invalid initial map dimension: expected {}, found {}",
            config.euclidean_dim(),
            initial_map.euclidean_dim()
        )));
    }
    let pose = config.parse_initial_map_pose()?;
    let initial_map = pose.apply(&initial_map);
    map_store.set_map(
        initial_map,
        &RigidTransform::identity(config.euclidean_dim()),
    )
}

/// A fully wired mapper: tracking, publishers and (offline) idle
/// supervision running on their own threads.
pub struct Bridge {
    handle: BridgeHandle,
    running: Arc<AtomicBool>,
    tracking: TrackingThread,
    map_publisher: MapPublisherThread,
    tf_publisher: TfPublisherThread,
    idle: Option<IdleShutdownThread>,
}

impl Bridge {
    /// Validate the config, build the engine, load the initial map and
    /// spawn all threads.
    pub fn launch(
        config: MapperConfig,
        source: Box<dyn CloudSource>,
        tf_tree: Arc<dyn TransformTree>,
        odom_sink: Box<dyn OdometrySink>,
        map_sink: Box<dyn MapSink>,
        tf_sink: Box<dyn TfSink>,
    ) -> Result<Self> {
        config.validate()?;
        let mapper = Mapper::new(&config)?;
        let map_store = Arc::clone(mapper.map_store());
        let pipelines = Arc::clone(mapper.pipelines());
        load_initial_map(&config, &map_store)?;

        let config = Arc::new(config);
        let handle = BridgeHandle::new(Arc::clone(&config), pipelines, Arc::clone(&map_store));
        let shared = Arc::new(BridgeShared::new(config.euclidean_dim()));
        let running = Arc::new(AtomicBool::new(true));

        let tracking = TrackingThread::spawn(
            mapper,
            source,
            tf_tree,
            odom_sink,
            Arc::clone(&shared),
            FrameIds::from(config.as_ref()),
            config.is_online,
            Arc::clone(&running),
        );
        let map_publisher = MapPublisherThread::spawn(
            Arc::clone(&map_store),
            map_sink,
            config.map_publish_rate,
            Arc::clone(&running),
        );
        let tf_publisher = TfPublisherThread::spawn(
            Arc::clone(&shared),
            tf_sink,
            config.map_tf_publish_rate,
            Arc::clone(&running),
        );
        let idle = if config.is_online {
            None
        } else {
            Some(IdleShutdownThread::spawn(
                Arc::clone(&shared),
                handle.clone(),
                config.final_map_file_name.clone(),
                config.max_idle_time,
                Arc::clone(&running),
            ))
        };

        Ok(Self {
            handle,
            running,
            tracking,
            map_publisher,
            tf_publisher,
            idle,
        })
    }

    pub fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    /// Ask every thread to stop after its current cycle.
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the tracking thread (which joins the in-flight rebuild),
    /// then stop and join the publishers.
    pub fn join(self) {
        if self.tracking.join().is_err() {
            log::error!("Tracking thread panicked");
        }
        self.running.store(false, Ordering::SeqCst);
        if self.map_publisher.join().is_err() {
            log::error!("Map publisher thread panicked");
        }
        if self.tf_publisher.join().is_err() {
            log::error!("Map tf publisher thread panicked");
        }
        if let Some(idle) = self.idle {
            if idle.join().is_err() {
                log::error!("Idle supervisor thread panicked");
            }
        }
    }
}
