use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::async_result::ResponseStream;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::health::Health;

/// Work to run against one selected server. Called once per attempt.
pub type Operation = Arc<dyn Fn(Endpoint) -> ResponseStream + Send + Sync>;

/// Load balancer interface
#[async_trait]
pub trait LoadBalancer: Send + Sync + Debug {
    /// Returns the next available server to which the request can be sent. If none are
    /// available, an error is returned.
    async fn next_available_endpoint(&self) -> Result<Endpoint>;

    /// Reports how an attempt against a server went.
    async fn record_outcome(&self, endpoint: &Endpoint, health: Health);

    /// Checks and update the health status of all servers.
    async fn check_endpoints_healths(&self);
}

/// Chooses servers and runs an operation against them, retrying according to its own rules. The
/// returned stream carries whatever the final attempt produced.
pub trait LoadBalancingPolicy: Send + Sync + Debug {
    fn select_and_invoke(&self, operation: Operation) -> ResponseStream;
}
