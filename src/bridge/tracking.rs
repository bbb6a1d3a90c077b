//! Tracking thread: one engine pass per observation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::types::{PointCloud, SensorObservation};
use crate::engine::Mapper;
use crate::error::Result;
use crate::io::transport::{CloudSource, OdometrySink, SourcePoll, TransformTree};

use super::{BridgeShared, FrameIds};

/// How long a TF lookup may wait before the observation is dropped.
const TF_WAIT: Duration = Duration::from_millis(100);

/// How often the loop re-checks the running flag while the source is idle.
const SOURCE_POLL: Duration = Duration::from_millis(100);

/// Handle of the tracking thread.
///
/// Single writer of the corrected sensor pose and the odom-to-map latch;
/// never blocks on publishing. On exit it waits for the in-flight rebuild.
pub struct TrackingThread {
    handle: JoinHandle<()>,
}

impl TrackingThread {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        mapper: Mapper,
        source: Box<dyn CloudSource>,
        tf_tree: Arc<dyn TransformTree>,
        odom_sink: Box<dyn OdometrySink>,
        shared: Arc<BridgeShared>,
        frames: FrameIds,
        is_online: bool,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("tracking".into())
            .spawn(move || {
                run_tracking_loop(
                    mapper, source, tf_tree, odom_sink, shared, frames, is_online, running,
                );
            })
            .expect("Failed to spawn tracking thread");
        Self { handle }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

#[allow(clippy::too_many_arguments)]
fn run_tracking_loop(
    mut mapper: Mapper,
    mut source: Box<dyn CloudSource>,
    tf_tree: Arc<dyn TransformTree>,
    mut odom_sink: Box<dyn OdometrySink>,
    shared: Arc<BridgeShared>,
    frames: FrameIds,
    is_online: bool,
    running: Arc<AtomicBool>,
) {
    log::info!("Tracking thread starting");
    while running.load(Ordering::SeqCst) {
        let (mut cloud, mut stamp_us) = match source.poll(SOURCE_POLL) {
            SourcePoll::Cloud { cloud, stamp_us } => (cloud, stamp_us),
            SourcePoll::Idle => continue,
            SourcePoll::Closed => break,
        };

        // Online tracking holds a queue depth of 1: drain to the newest
        // pending observation and drop the stale ones.
        if is_online {
            loop {
                match source.poll(Duration::ZERO) {
                    SourcePoll::Cloud {
                        cloud: newer,
                        stamp_us: newer_stamp,
                    } => {
                        cloud = newer;
                        stamp_us = newer_stamp;
                    }
                    _ => break,
                }
            }
        }

        if let Err(e) = track_one(
            &mut mapper,
            cloud,
            stamp_us,
            tf_tree.as_ref(),
            odom_sink.as_mut(),
            &shared,
            &frames,
        ) {
            log::warn!("Dropping observation: {}", e);
        }
    }
    mapper.wait_for_rebuild();
    log::info!("Tracking thread stopping");
}

fn track_one(
    mapper: &mut Mapper,
    cloud: PointCloud,
    stamp_us: u64,
    tf_tree: &dyn TransformTree,
    odom_sink: &mut dyn OdometrySink,
    shared: &BridgeShared,
    frames: &FrameIds,
) -> Result<()> {
    let sensor_to_odom = tf_tree.lookup(&frames.sensor, &frames.odom, stamp_us, TF_WAIT)?;
    let prior_sensor_pose = shared.odom_to_map.lock().compose(&sensor_to_odom);

    mapper.process_input(SensorObservation::new(cloud, prior_sensor_pose, stamp_us))?;
    let sensor_to_map = mapper.sensor_pose().clone();

    {
        *shared.odom_to_map.lock() = sensor_to_map
            .compose(&sensor_to_odom.inverse())
            .corrected();
    }

    let robot_to_sensor = tf_tree.lookup(&frames.robot, &frames.sensor, stamp_us, TF_WAIT)?;
    odom_sink.publish_odometry(&sensor_to_map.compose(&robot_to_sensor), stamp_us);

    *shared.last_input.lock() = Some(Instant::now());
    Ok(())
}
