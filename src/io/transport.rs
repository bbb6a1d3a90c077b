//! Transport seams between the robot framework and the bridge.
//!
//! The sensor/odometry transport, the TF tree and the publication transport
//! are external; the bridge talks to them through these traits. A
//! crossbeam-backed [`CloudSource`] is provided for in-process feeds.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::core::types::{PointCloud, RigidTransform};
use crate::error::Result;

/// One poll of an observation source.
#[derive(Debug)]
pub enum SourcePoll {
    /// A cloud in the sensor frame with its steady-clock timestamp.
    Cloud { cloud: PointCloud, stamp_us: u64 },
    /// Nothing arrived within the timeout.
    Idle,
    /// The stream ended; the tracking loop should stop.
    Closed,
}

/// Delivers observations to the tracking thread.
pub trait CloudSource: Send {
    fn poll(&mut self, timeout: Duration) -> SourcePoll;
}

/// Rigid-transform lookups against the robot's TF tree.
pub trait TransformTree: Send + Sync {
    /// Transform taking coordinates in `source_frame` to `target_frame` at
    /// `stamp_us`, waiting up to `timeout` for it to become available.
    /// Failure (timeout, extrapolation) is the recoverable `Transform`
    /// error: the bridge drops the observation with a warning.
    fn lookup(
        &self,
        source_frame: &str,
        target_frame: &str,
        stamp_us: u64,
        timeout: Duration,
    ) -> Result<RigidTransform>;
}

/// Publishes the whole map, in the map frame.
pub trait MapSink: Send {
    fn publish_map(&mut self, map: &PointCloud);
}

/// Publishes the per-observation corrected odometry, in the map frame.
pub trait OdometrySink: Send {
    fn publish_odometry(&mut self, robot_to_map: &RigidTransform, stamp_us: u64);
}

/// Broadcasts the latched odom-to-map correction.
pub trait TfSink: Send {
    fn broadcast_odom_to_map(&mut self, odom_to_map: &RigidTransform);
}

/// Sending half of an in-process observation channel.
#[derive(Clone)]
pub struct CloudSender {
    tx: Sender<(PointCloud, u64)>,
}

impl CloudSender {
    pub fn send(&self, cloud: PointCloud, stamp_us: u64) {
        if self.tx.send((cloud, stamp_us)).is_err() {
            log::warn!("Observation dropped: tracking thread is gone");
        }
    }
}

/// Receiving half, implementing [`CloudSource`].
pub struct ChannelCloudSource {
    rx: Receiver<(PointCloud, u64)>,
}

impl CloudSource for ChannelCloudSource {
    fn poll(&mut self, timeout: Duration) -> SourcePoll {
        match self.rx.recv_timeout(timeout) {
            Ok((cloud, stamp_us)) => SourcePoll::Cloud { cloud, stamp_us },
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Closed,
        }
    }
}

/// In-process observation channel.
///
/// The channel itself is unbounded; in online mode the tracking loop drains
/// it to the newest pending observation, which gives the drop-to-newest,
/// queue-depth-1 behavior. Offline every observation is processed in order.
pub fn cloud_channel() -> (CloudSender, ChannelCloudSource) {
    let (tx, rx) = unbounded();
    (CloudSender { tx }, ChannelCloudSource { rx })
}
