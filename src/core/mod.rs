// Core business logic module

pub mod chain_client;
pub mod config;
pub mod context;
pub mod environment;
pub mod metrics;
pub mod monitoring;
pub mod supervisor;

// Re-export commonly used items
pub use chain_client::{ChainClient, CliChainClient, EpochInfo};
pub use config::{ConfigStore, GlobalConfig};
pub use context::{Context, Paths};
pub use environment::{Environment, EnvironmentRegistry};
pub use metrics::{MetricSample, MetricsCollector};
pub use monitoring::MonitoringService;
pub use supervisor::{ProcessSupervisor, StartOptions, ValidatorStatus};
