use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContainerId, ContainerSummary, MetricRecord, RunPhase};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn runtime command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("runtime command exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("runtime command produced no data")]
    EmptyOutput,

    #[error("unrecognised stats row: {0:?}")]
    Format(String),

    #[error("failed to decode runtime output: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Port for querying the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers, including stopped ones
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Current run phase of one container
    async fn inspect(&self, id: &ContainerId) -> RuntimeResult<RunPhase>;

    /// One-shot stats sample. Dropping the future terminates the underlying call.
    async fn snapshot(&self, id: &ContainerId) -> RuntimeResult<MetricRecord>;
}
