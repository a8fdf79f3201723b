//! Change tracking, workload partitioning and the staged pipeline

mod change_tracker;
mod ingest;
mod partition;
mod pipeline;

pub use change_tracker::{
    artifact_key, file_checksum, ArtifactPaths, ChangeTracker, SourceFile, StageFlags, CHUNK_SUFFIX,
    TABLE_SUFFIX, TEXT_SUFFIX,
};
pub use ingest::ingest_directory;
pub use partition::{Partition, Weight, WorkloadPartitioner};
pub use pipeline::{Pipeline, PipelineContext, PipelineOutput};
