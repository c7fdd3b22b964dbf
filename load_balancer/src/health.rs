use std::sync::Arc;

use log::{error, info, warn};
use reqwest::{Client, StatusCode};
use tokio::task::{spawn, JoinHandle};
use tokio::time::{interval, Duration};

use crate::endpoint::Endpoint;
use crate::load_balancer::LoadBalancer;

/// Servers are defined as either healthy or unhealthy. In the case of unhealthy servers, the load
/// balancer will not route requests to them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// Checks the health of a server by sending a request to its health check endpoint. The server is
/// considered healthy if the endpoint returns anything, unhealthy if it cannot be reached.
#[derive(Clone, Debug)]
pub struct HealthProbe {
    client: Client,
    path: String,
}

impl HealthProbe {
    pub fn new(client: Client, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { client, path }
    }

    pub async fn check(&self, endpoint: &Endpoint) -> Health {
        let start_time = std::time::Instant::now();

        let health_check_address = format!("http://{}{}", endpoint, self.path);
        let response = self.client.get(&health_check_address).send().await;

        let elapsed_time_ms = start_time.elapsed().as_millis();
        info!("checking server health took {}ms", elapsed_time_ms);

        match response {
            Ok(r) => {
                if r.status() != StatusCode::OK {
                    warn!(
                        "Server {} does not support health checks on address {}",
                        endpoint, health_check_address
                    );
                }
                info!("Server {} is healthy", endpoint);
                Health::Healthy
            }
            Err(e) => {
                error!("Failed to send health check to server {}: {:?}", endpoint, e);
                info!("Server {} is unhealthy", endpoint);
                Health::Unhealthy
            }
        }
    }
}

/// Starts a background task that checks the health of the servers of the load balancer at regular
/// intervals. The task runs until the returned handle is aborted.
pub fn spawn_health_checks(
    load_balancer: Arc<dyn LoadBalancer>,
    health_check_interval: Duration,
) -> JoinHandle<()> {
    spawn(async move {
        let mut interval = interval(health_check_interval);
        loop {
            interval.tick().await;
            load_balancer.check_endpoints_healths().await;
        }
    })
}
