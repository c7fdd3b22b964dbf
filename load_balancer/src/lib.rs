//! Client-side load-balanced HTTP dispatch.
//!
//! Requests addressed to a logical service URI are routed to a server handed out by a load
//! balancer, sent over a [`Transport`](transport::Transport), and handed back either as a single
//! value or as a stream of values, depending on how the operation was declared.

pub mod async_result;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod load_balancer;
pub mod request;
pub mod result_shape;
pub mod retry;
pub mod rewriter;
pub mod round_robin_load_balancer;
pub mod transport;

pub use async_result::{AsyncResult, Payload, ResponseStream};
pub use client::{CallArgs, Client};
pub use config::Config;
pub use dispatcher::{DispatchMode, Dispatcher};
pub use endpoint::Endpoint;
pub use error::{Error, Result, TransportError};
pub use request::HttpRequest;
pub use result_shape::{classify, ResultShape, ReturnType};
pub use rewriter::rewrite;
