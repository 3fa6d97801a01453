//! Snapshot Domain
//!
//! Versioned binary snapshots: a container of typed, independently
//! checksummed chunks, and the field codec components use to fill them.

pub mod codec;
pub mod container;

pub use codec::{ChunkReader, ChunkWriter};
pub use container::{ChunkType, Snapshot, SNAPSHOT_MAGIC};
