//! Rate-limited publisher threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::MapStore;
use crate::io::transport::{MapSink, TfSink};

use super::BridgeShared;

fn period(rate_hz: f32) -> Duration {
    Duration::from_secs_f32(1.0 / rate_hz)
}

/// Polls the map store and publishes the map when, and only when, a new
/// one is available.
pub struct MapPublisherThread {
    handle: JoinHandle<()>,
}

impl MapPublisherThread {
    pub fn spawn(
        map_store: Arc<MapStore>,
        mut sink: Box<dyn MapSink>,
        rate_hz: f32,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("map-publisher".into())
            .spawn(move || {
                let sleep = period(rate_hz);
                while running.load(Ordering::SeqCst) {
                    if let Some(map) = map_store.get_new_map() {
                        log::debug!("Publishing map with {} points", map.nb_points());
                        sink.publish_map(&map);
                    }
                    thread::sleep(sleep);
                }
            })
            .expect("Failed to spawn map publisher thread");
        Self { handle }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Broadcasts the latched odom-to-map correction at a fixed rate.
pub struct TfPublisherThread {
    handle: JoinHandle<()>,
}

impl TfPublisherThread {
    pub fn spawn(
        shared: Arc<BridgeShared>,
        mut sink: Box<dyn TfSink>,
        rate_hz: f32,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("map-tf-publisher".into())
            .spawn(move || {
                let sleep = period(rate_hz);
                while running.load(Ordering::SeqCst) {
                    let odom_to_map = shared.odom_to_map.lock().clone();
                    sink.broadcast_odom_to_map(&odom_to_map);
                    thread::sleep(sleep);
                }
            })
            .expect("Failed to spawn map tf publisher thread");
        Self { handle }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}
