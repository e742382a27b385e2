//! In-process cluster backing [`crate::backend::MemoryBackend`]

mod cluster;
mod value;

pub use cluster::{MAX_ITEM_SIZE, MemoryCluster};
pub(crate) use cluster::ClusterState;
pub use value::{Item, MAX_RELATIVE_EXPTIME, deadline, unix_now};
