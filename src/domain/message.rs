use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContainerId, MetricRecord, RunPhase};

/// Frames a client may send over its connection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        container_id: ContainerId,
        #[serde(default, alias = "cadence")]
        refresh_rate: Option<u64>,
    },
    Unsubscribe {
        container_id: ContainerId,
    },
}

impl ClientMessage {
    pub fn container_id(&self) -> &ContainerId {
        match self {
            Self::Subscribe { container_id, .. } | Self::Unsubscribe { container_id } => container_id,
        }
    }
}

/// Frames pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Stats {
        container_id: ContainerId,
        data: MetricRecord,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    Status {
        container_id: ContainerId,
        status: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn stats(container_id: ContainerId, data: MetricRecord) -> Self {
        Self::Stats {
            container_id,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn status(container_id: ContainerId, phase: &RunPhase) -> Self {
        Self::Status {
            container_id,
            status: phase.as_str().to_string(),
            timestamp: Utc::now(),
        }
    }
}
