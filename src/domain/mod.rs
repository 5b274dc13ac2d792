pub mod container;
pub mod message;
pub mod metrics;
pub mod subscription;

pub use container::{ContainerId, ContainerSummary, RunPhase};
pub use message::{ClientMessage, ServerMessage};
pub use metrics::MetricRecord;
pub use subscription::{Cadence, SubscriberId};
