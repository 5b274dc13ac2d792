use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label carried by the zeroed record produced for rows that cannot be decoded
pub const UNKNOWN_LABEL: &str = "unknown";

/// Point-in-time resource usage of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    #[serde(rename = "name")]
    pub container_label: String,
    pub cpu_percent: f64,
    #[serde(rename = "memUsed")]
    pub mem_used_bytes: u64,
    #[serde(rename = "memTotal")]
    pub mem_total_bytes: u64,
    pub mem_percent: f64,
    #[serde(rename = "netIn")]
    pub net_in_bytes: u64,
    #[serde(rename = "netOut")]
    pub net_out_bytes: u64,
    #[serde(rename = "blockRead")]
    pub block_read_bytes: u64,
    #[serde(rename = "blockWrite")]
    pub block_write_bytes: u64,
    pub pids: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Zeroed record standing in for a row that did not match the expected layout
    pub fn unknown(timestamp: DateTime<Utc>) -> Self {
        Self {
            container_label: UNKNOWN_LABEL.to_string(),
            cpu_percent: 0.0,
            mem_used_bytes: 0,
            mem_total_bytes: 0,
            mem_percent: 0.0,
            net_in_bytes: 0,
            net_out_bytes: 0,
            block_read_bytes: 0,
            block_write_bytes: 0,
            pids: 0,
            timestamp,
        }
    }

    #[cfg(test)]
    pub fn is_unknown(&self) -> bool {
        self.container_label == UNKNOWN_LABEL
            && self.mem_total_bytes == 0
            && self.pids == 0
            && self.cpu_percent == 0.0
    }
}
