use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use log::{debug, info, warn};

use crate::async_result::{Payload, ResponseStream};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::health::Health;
use crate::load_balancer::{LoadBalancer, LoadBalancingPolicy, Operation};

/// How many extra attempts a failed request gets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on the server that just failed.
    pub max_retries_same_server: u32,

    /// Other servers tried once the same server retries are used up.
    pub max_retries_next_server: u32,
}

/// Runs operations on servers handed out by a load balancer. Retriable failures are retried as
/// long as the policy allows and nothing has been emitted to the caller yet.
#[derive(Debug)]
pub struct RetryingPolicy {
    load_balancer: Arc<dyn LoadBalancer>,
    retry: RetryPolicy,
}

impl RetryingPolicy {
    pub fn new(load_balancer: Arc<dyn LoadBalancer>, retry: RetryPolicy) -> Self {
        Self {
            load_balancer,
            retry,
        }
    }
}

impl LoadBalancingPolicy for RetryingPolicy {
    fn select_and_invoke(&self, operation: Operation) -> ResponseStream {
        let attempts = Attempts {
            load_balancer: Arc::clone(&self.load_balancer),
            operation,
            retry: self.retry,
            endpoint: None,
            same_server_retries: 0,
            next_server_retries: 0,
            in_flight: None,
            emitted: false,
            done: false,
        };

        stream::unfold(attempts, Attempts::next_value).boxed()
    }
}

/// State of one dispatch across all of its attempts.
struct Attempts {
    load_balancer: Arc<dyn LoadBalancer>,
    operation: Operation,
    retry: RetryPolicy,

    /// Server of the current attempt, kept when the next attempt goes to the same server.
    endpoint: Option<Endpoint>,
    same_server_retries: u32,
    next_server_retries: u32,
    in_flight: Option<ResponseStream>,

    /// Whether a value reached the caller, after which failures are final.
    emitted: bool,
    done: bool,
}

impl Attempts {
    async fn next_value(mut self) -> Option<(Result<Payload>, Self)> {
        loop {
            if self.done {
                return None;
            }

            let Some(in_flight) = self.in_flight.as_mut() else {
                if let Err(e) = self.start_attempt().await {
                    self.done = true;
                    return Some((Err(e), self));
                }
                continue;
            };

            match in_flight.next().await {
                Some(Ok(value)) => {
                    self.emitted = true;
                    return Some((Ok(value), self));
                }
                Some(Err(e)) => {
                    self.in_flight = None;
                    if !e.is_retriable() {
                        self.done = true;
                        return Some((Err(e), self));
                    }

                    if let Some(endpoint) = &self.endpoint {
                        self.load_balancer
                            .record_outcome(endpoint, Health::Unhealthy)
                            .await;
                    }
                    if self.emitted || !self.plan_retry() {
                        self.done = true;
                        return Some((Err(e), self));
                    }
                    warn!("Attempt failed with {}, retrying", e);
                }
                None => {
                    if let Some(endpoint) = &self.endpoint {
                        self.load_balancer
                            .record_outcome(endpoint, Health::Healthy)
                            .await;
                    }
                    self.done = true;
                    return None;
                }
            }
        }
    }

    async fn start_attempt(&mut self) -> Result<()> {
        let endpoint = match self.endpoint.clone() {
            Some(endpoint) => endpoint,
            None => self.load_balancer.next_available_endpoint().await?,
        };
        info!("Routing request to server {}", endpoint);

        self.in_flight = Some((self.operation)(endpoint.clone()));
        self.endpoint = Some(endpoint);
        Ok(())
    }

    /// Moves on to the next attempt, returns false once the retries are used up.
    fn plan_retry(&mut self) -> bool {
        if self.same_server_retries < self.retry.max_retries_same_server {
            self.same_server_retries += 1;
            debug!("retry {} on the same server", self.same_server_retries);
            return true;
        }

        if self.next_server_retries < self.retry.max_retries_next_server {
            self.next_server_retries += 1;
            self.same_server_retries = 0;
            self.endpoint = None;
            debug!("retry {} on the next server", self.next_server_retries);
            return true;
        }

        false
    }
}
