//! BhumiMapper - Incremental online point-cloud mapping for mobile robots.
//!
//! Ingests range-sensor observations with an odometry-derived pose prior,
//! refines the prior by aligning each observation to the global map with
//! ICP, publishes the corrected pose, grows the map with newly seen
//! structure and maintains a per-point probability of being dynamic so the
//! post-filters can discard moving obstacles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    bridge/                          │  ← Thread wiring
//! │     (tracking loop, publishers, idle shutdown)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     io/                             │  ← Infrastructure
//! │      (map persistence, scans, transport seams)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   engine/                           │  ← Orchestration
//! │  (map store, update policy, dynamic points, mapper) │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │             filtering/      matching/               │  ← Algorithms
//! │        (filter chains)     (ICP aligner)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    core/                            │  ← Foundation
//! │               (types, math)                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Threads
//!
//! - **Tracking** (single thread) runs [`Mapper::process_input`] once per
//!   observation: filter, align, publish pose, maybe trigger a rebuild.
//! - **Rebuild** (at most one detached thread) runs the heavier map merge
//!   and post-filtering without blocking tracking.
//! - **Publishers** poll the map store and the odom-to-map latch at their
//!   configured rates.
//!
//! The map lock and the aligner lock are disjoint and never nested; the
//! rebuilt map is committed by a single swap in [`MapStore`].

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Algorithms (depend on core)
// ============================================================================
pub mod filtering;
pub mod matching;

// ============================================================================
// Layer 3: Engine (depends on core, filtering, matching)
// ============================================================================
pub mod engine;

// ============================================================================
// Layer 4: Configuration and errors
// ============================================================================
pub mod config;
pub mod error;

// ============================================================================
// Layer 5: I/O infrastructure and bridge (depend on all layers)
// ============================================================================
pub mod bridge;
pub mod io;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::types::{
    Descriptor, PointCloud, RigidTransform, SensorObservation, NORMALS, PROBABILITY_DYNAMIC,
};

// Errors
pub use error::{MapperError, Result};

// Configuration
pub use config::MapperConfig;

// Filtering
pub use filtering::{FilterChain, FilterPipelines, FilterSpec, RadiusGate};

// Matching
pub use matching::{Aligner, IcpAligner, IcpConfig};

// Engine
pub use engine::{
    retrieve_points_further_than_min_dist_new_point, update_dynamic_probabilities,
    DynamicPointsConfig, MapStore, MapUpdateCondition, Mapper, UpdatePolicy,
};

// I/O
pub use io::{
    cloud_channel, ChannelCloudSource, CloudSender, CloudSource, LaserScan, MapSink,
    OdometrySink, SourcePoll, TfSink, TransformTree,
};

// Bridge
pub use bridge::{
    load_initial_map, Bridge, BridgeHandle, BridgeShared, FrameIds, IdleShutdownThread,
    MapPublisherThread, TfPublisherThread, TrackingThread,
};
