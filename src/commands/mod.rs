// Command handlers module
pub mod config;
pub mod env;
pub mod metrics;
pub mod monitor;
pub mod validator;

use std::sync::Arc;
use std::time::Duration;

use crate::core::chain_client::{ChainClient, CliChainClient};
use crate::core::context::Context;

/// Client used for readiness probes and chain queries
pub fn chain_client(ctx: &Context) -> Arc<dyn ChainClient> {
    Arc::new(CliChainClient::new(
        ctx.config.validator.client_binary.clone(),
        Duration::from_secs(ctx.config.monitoring.query_timeout_secs),
    ))
}
