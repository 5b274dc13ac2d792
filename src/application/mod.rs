pub mod monitoring;
pub mod publisher;
pub mod registry;
mod scheduler;

pub use monitoring::MonitoringService;
pub use registry::SubscriptionRegistry;
