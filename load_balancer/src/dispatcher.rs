use std::sync::Arc;

use log::debug;

use crate::async_result::{failed, AsyncResult};
use crate::endpoint::Endpoint;
use crate::load_balancer::{LoadBalancingPolicy, Operation};
use crate::request::HttpRequest;
use crate::result_shape::ResultShape;
use crate::rewriter::rewrite;
use crate::transport::Transport;

/// Whether requests go through a load balancer, decided once when the dispatcher is built.
#[derive(Clone, Debug)]
pub enum DispatchMode {
    /// Requests are sent to the address they carry.
    Direct,

    /// Requests are routed to servers chosen by the policy.
    LoadBalanced(Arc<dyn LoadBalancingPolicy>),
}

/// Routes the requests of one operation and hands back results in the operation's shape.
///
/// The dispatcher only holds shared, read-only configuration, so a single instance can serve any
/// number of concurrent calls. It adds no retries or fallbacks of its own: every failure coming
/// from the load balancer or the transport reaches the caller unchanged.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    mode: DispatchMode,
    transport: Arc<dyn Transport>,
    shape: ResultShape,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode, transport: Arc<dyn Transport>, shape: ResultShape) -> Self {
        Self {
            mode,
            transport,
            shape,
        }
    }

    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Starts the exchange for a request. Nothing is sent before the result is polled, and
    /// dropping the result cancels server selection and the transport call alike.
    pub fn dispatch(&self, request: HttpRequest) -> AsyncResult {
        match &self.mode {
            DispatchMode::Direct => {
                debug!("sending {} {} without load balancing", request.method, request.url);
                AsyncResult::from_stream(self.transport.send(request), self.shape)
            }
            DispatchMode::LoadBalanced(policy) => {
                let transport = Arc::clone(&self.transport);
                let operation: Operation = Arc::new(move |endpoint: Endpoint| {
                    match rewrite(&request, &endpoint) {
                        Ok(physical) => transport.send(physical),
                        Err(e) => failed(e),
                    }
                });

                let stream = policy.select_and_invoke(operation);
                AsyncResult::from_stream(stream, self.shape)
            }
        }
    }
}
