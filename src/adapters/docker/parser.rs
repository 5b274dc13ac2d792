use std::iter::Peekable;
use std::str::SplitWhitespace;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::domain::{ContainerId, ContainerSummary, MetricRecord};

/// Fewest tokens a stats row can have: every ratio column written without spaces
pub const MIN_ROW_TOKENS: usize = 7;

const RATIO_SEPARATOR: &str = "/";

/// Multiplier for a size unit as printed by the runtime. Decimal and binary
/// prefixes are distinct units.
fn unit_multiplier(unit: &str) -> f64 {
    match unit {
        "B" => 1.0,
        "kB" => 1_000.0,
        "KB" => 1_024.0,
        "MB" => 1_000_000.0,
        "MiB" => 1_048_576.0,
        "GB" => 1_000_000_000.0,
        "GiB" => 1_073_741_824.0,
        "TB" => 1_000_000_000_000.0,
        "TiB" => 1_099_511_627_776.0,
        _ => 1.0,
    }
}

/// Parse a human readable size such as `1.5GiB` into bytes.
///
/// The input must be a decimal number, optionally followed directly by a unit.
/// A bare number or an unrecognised unit counts as bytes. Anything else,
/// including the empty string, yields 0.
pub fn parse_byte_quantity(raw: &str) -> f64 {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);

    if number.is_empty() {
        return 0.0;
    }
    if !unit.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return 0.0;
    }

    match number.parse::<f64>() {
        Ok(value) => value * unit_multiplier(unit),
        Err(_) => 0.0,
    }
}

fn to_bytes(raw: &str) -> u64 {
    parse_byte_quantity(raw).round() as u64
}

/// Parse `12.5%` into `12.5`; malformed input yields 0.0
pub fn parse_percent(raw: &str) -> f64 {
    raw.trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

struct Ratio<'a> {
    used: &'a str,
    total: &'a str,
}

/// Consume one `used / total` column. Accepts the separator as its own token
/// or glued to either side.
fn take_ratio<'a>(tokens: &mut Peekable<SplitWhitespace<'a>>) -> Option<Ratio<'a>> {
    let first = tokens.next()?;

    if let Some((used, total)) = first.split_once(RATIO_SEPARATOR) {
        let total = if total.is_empty() { tokens.next()? } else { total };
        return Some(Ratio { used, total });
    }

    let next = *tokens.peek()?;
    if next == RATIO_SEPARATOR {
        tokens.next();
        let total = tokens.next()?;
        return Some(Ratio { used: first, total });
    }
    if let Some(total) = next.strip_prefix(RATIO_SEPARATOR) {
        tokens.next();
        return Some(Ratio { used: first, total });
    }

    None
}

struct Row<'a> {
    label: &'a str,
    cpu: &'a str,
    memory: Ratio<'a>,
    mem_percent: &'a str,
    network: Ratio<'a>,
    block_io: Ratio<'a>,
    pids: &'a str,
}

fn decode_row(line: &str) -> Option<Row<'_>> {
    let mut tokens = line.split_whitespace().peekable();

    let label = tokens.next()?;
    let cpu = tokens.next()?;
    let memory = take_ratio(&mut tokens)?;
    let mem_percent = tokens.next()?;
    let network = take_ratio(&mut tokens)?;
    let block_io = take_ratio(&mut tokens)?;
    // The PID count is the final column; anything between is format drift.
    let pids = tokens.last()?;

    Some(Row {
        label,
        cpu,
        memory,
        mem_percent,
        network,
        block_io,
        pids,
    })
}

/// Decode one data row of the stats table, or `None` (with a warning) when
/// the row does not match the expected layout.
pub fn decode_stats_line(line: &str, observed_at: DateTime<Utc>) -> Option<MetricRecord> {
    let token_count = line.split_whitespace().count();
    if token_count < MIN_ROW_TOKENS {
        warn!(tokens = token_count, "Unexpected stats line format: {:?}", line);
        return None;
    }

    let Some(row) = decode_row(line) else {
        warn!(tokens = token_count, "Stats line does not match column layout: {:?}", line);
        return None;
    };

    Some(MetricRecord {
        container_label: row.label.to_string(),
        cpu_percent: parse_percent(row.cpu),
        mem_used_bytes: to_bytes(row.memory.used),
        mem_total_bytes: to_bytes(row.memory.total),
        mem_percent: parse_percent(row.mem_percent),
        net_in_bytes: to_bytes(row.network.used),
        net_out_bytes: to_bytes(row.network.total),
        block_read_bytes: to_bytes(row.block_io.used),
        block_write_bytes: to_bytes(row.block_io.total),
        pids: row.pids.trim().parse().unwrap_or(0),
        timestamp: observed_at,
    })
}

/// Lenient form of [`decode_stats_line`]: a mismatched row becomes the zeroed
/// [`MetricRecord::unknown`] record instead of `None`. Never fails.
#[cfg_attr(not(test), allow(dead_code))]
pub fn parse_stats_line(line: &str, observed_at: DateTime<Utc>) -> MetricRecord {
    decode_stats_line(line, observed_at).unwrap_or_else(|| MetricRecord::unknown(observed_at))
}

/// Pick the data row out of a header + row table
pub fn data_row(output: &str) -> Option<&str> {
    output
        .trim()
        .lines()
        .nth(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// One line of `ps --format json`
#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "State", default)]
    state: String,
}

impl From<ListingRow> for ContainerSummary {
    fn from(row: ListingRow) -> Self {
        Self {
            id: ContainerId::new(row.id),
            name: row.names,
            image: row.image,
            status: row.status,
            state: row.state,
        }
    }
}

/// Decode newline delimited JSON listing records. Blank output is an empty listing.
pub fn parse_listing(output: &str) -> Result<Vec<ContainerSummary>, serde_json::Error> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<ListingRow>(line).map(ContainerSummary::from))
        .collect()
}
