use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::RwLock as TokioRwLock;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::health::{Health, HealthProbe};
use crate::load_balancer::LoadBalancer;

#[derive(Clone, Debug)]
struct ServerStatus {
    endpoint: Endpoint,
    health: Health,
}

#[derive(Debug)]
struct RoundRobinState {
    servers: Vec<ServerStatus>,

    /// Index of the server to which the next request will be sent.
    current_index: usize,
}

/// Hands out healthy servers in a round robin fashion.
#[derive(Debug)]
pub struct RoundRobinLoadBalancer {
    /// Name of the service, used in errors and logs.
    service: String,

    state: TokioRwLock<RoundRobinState>,

    /// Probe used by the periodic health checks, none disables them.
    probe: Option<HealthProbe>,
}

impl RoundRobinLoadBalancer {
    /// Creates a new load balancer over the given servers, all of them initially healthy.
    pub fn new(service: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        let servers = endpoints
            .into_iter()
            .map(|endpoint| ServerStatus {
                endpoint,
                health: Health::Healthy,
            })
            .collect();

        Self {
            service: service.into(),
            state: TokioRwLock::new(RoundRobinState {
                servers,
                current_index: 0,
            }),
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: HealthProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub async fn health_of(&self, endpoint: &Endpoint) -> Option<Health> {
        let state = self.state.read().await;
        state
            .servers
            .iter()
            .find(|server| &server.endpoint == endpoint)
            .map(|server| server.health)
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinLoadBalancer {
    async fn next_available_endpoint(&self) -> Result<Endpoint> {
        debug!("trying to acquire round robin write lock");
        let mut state = self.state.write().await;
        debug!("acquired round robin write lock");

        let server_count = state.servers.len();
        for _ in 0..server_count {
            let index = state.current_index;
            state.current_index = (state.current_index + 1) % server_count;

            let server = &state.servers[index];
            if server.health == Health::Healthy {
                debug!("selected healthy server {}", server.endpoint);
                return Ok(server.endpoint.clone());
            }
        }

        // Only the health checks bring servers back; without them every server stays a candidate.
        if self.probe.is_none() && server_count > 0 {
            let index = state.current_index;
            state.current_index = (state.current_index + 1) % server_count;
            let endpoint = state.servers[index].endpoint.clone();
            warn!("All servers of {} are unhealthy, trying {}", self.service, endpoint);
            return Ok(endpoint);
        }

        Err(Error::NoServerAvailable(self.service.clone()))
    }

    async fn record_outcome(&self, endpoint: &Endpoint, health: Health) {
        let mut state = self.state.write().await;
        if let Some(server) = state
            .servers
            .iter_mut()
            .find(|server| &server.endpoint == endpoint)
        {
            if server.health != health {
                warn!("Server {} is now {:?}", endpoint, health);
                server.health = health;
            }
        }
    }

    async fn check_endpoints_healths(&self) {
        let Some(probe) = &self.probe else {
            return;
        };
        let start_time = std::time::Instant::now();

        // The lock is not held while probing
        let endpoints: Vec<Endpoint> = {
            let state = self.state.read().await;
            state.servers.iter().map(|s| s.endpoint.clone()).collect()
        };
        for endpoint in &endpoints {
            let health = probe.check(endpoint).await;
            self.record_outcome(endpoint, health).await;
        }

        let elapsed_time = start_time.elapsed().as_millis();
        info!("checking all servers health took {}ms", elapsed_time);
    }
}
