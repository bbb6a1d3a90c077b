//! I/O infrastructure: persistence, scan conversion, transport seams.

pub mod map_file;
pub mod scan;
pub mod transport;

pub use scan::LaserScan;
pub use transport::{
    cloud_channel, ChannelCloudSource, CloudSender, CloudSource, MapSink, OdometrySink,
    SourcePoll, TfSink, TransformTree,
};
