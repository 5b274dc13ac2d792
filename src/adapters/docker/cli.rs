use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, warn};

use super::parser::{data_row, decode_stats_line, parse_listing};
use crate::domain::{ContainerId, ContainerSummary, MetricRecord, RunPhase};
use crate::ports::{ContainerRuntime, RuntimeError, RuntimeResult};

const STATS_FORMAT: &str =
    "table {{.Container}}\t{{.CPUPerc}}\t{{.MemUsage}}\t{{.MemPerc}}\t{{.NetIO}}\t{{.BlockIO}}\t{{.PIDs}}";
const INSPECT_FORMAT: &str = "{{.State.Status}}";

/// Docker adapter that shells out to the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Run one CLI invocation to completion and return its stdout.
    ///
    /// The child is killed if the returned future is dropped before it exits.
    async fn run(&self, args: &[&str]) -> RuntimeResult<String> {
        debug!("exec {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(RuntimeError::Exit {
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!("{} {} wrote to stderr: {}", self.binary, args.first().unwrap_or(&""), stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let output = self.run(&["ps", "-a", "--format", "json"]).await?;
        Ok(parse_listing(&output)?)
    }

    async fn inspect(&self, id: &ContainerId) -> RuntimeResult<RunPhase> {
        let output = self
            .run(&["inspect", id.as_str(), "--format", INSPECT_FORMAT])
            .await?;
        Ok(RunPhase::parse(&output))
    }

    async fn snapshot(&self, id: &ContainerId) -> RuntimeResult<MetricRecord> {
        let output = self
            .run(&["stats", id.as_str(), "--no-stream", "--format", STATS_FORMAT])
            .await?;
        let row = data_row(&output).ok_or(RuntimeError::EmptyOutput)?;
        decode_stats_line(row, Utc::now()).ok_or_else(|| RuntimeError::Format(row.to_string()))
    }
}
