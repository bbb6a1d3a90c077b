//! Offline idle supervision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{BridgeHandle, BridgeShared};

const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Offline-mode watchdog: once observations stop arriving for longer than
/// `max_idle_time` seconds, saves the final map and requests shutdown.
///
/// The clock only starts after the first processed observation.
pub struct IdleShutdownThread {
    handle: JoinHandle<()>,
}

impl IdleShutdownThread {
    pub fn spawn(
        shared: Arc<BridgeShared>,
        handle: BridgeHandle,
        final_map_file_name: String,
        max_idle_time: f32,
        running: Arc<AtomicBool>,
    ) -> Self {
        let thread_handle = thread::Builder::new()
            .name("idle-supervisor".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let idle_for = (*shared.last_input.lock()).map(|t| t.elapsed());
                    if let Some(idle) = idle_for {
                        if idle.as_secs_f32() > max_idle_time {
                            if let Err(e) = handle.save_map(&final_map_file_name) {
                                log::error!("Unable to save final map: {}", e);
                            }
                            log::info!("Idle for {:.1}s, shutting down", idle.as_secs_f32());
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    thread::sleep(CHECK_INTERVAL);
                }
            })
            .expect("Failed to spawn idle supervisor thread");
        Self {
            handle: thread_handle,
        }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}
