use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::info;
use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio::task::JoinHandle;
use url::Url;

use crate::async_result::AsyncResult;
use crate::config::{Config, LoadBalancerConfig, OperationConfig};
use crate::dispatcher::{DispatchMode, Dispatcher};
use crate::error::{Error, Result};
use crate::health::{spawn_health_checks, HealthProbe};
use crate::load_balancer::LoadBalancer;
use crate::request::HttpRequest;
use crate::result_shape::{classify, ResultShape, ReturnType};
use crate::retry::RetryingPolicy;
use crate::round_robin_load_balancer::RoundRobinLoadBalancer;
use crate::transport::{ReqwestTransport, Transport};

/// Arguments of one call.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    /// Values for the `{name}` segments of the operation path.
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug)]
struct BoundOperation {
    method: Method,
    path: String,
    dispatcher: Dispatcher,
}

/// Client of one service. Every operation is bound when the client is built: its return shape is
/// classified once and the client refuses to start if any of them is unsupported.
#[derive(Debug)]
pub struct Client {
    service: String,
    base: Url,
    operations: HashMap<String, BoundOperation>,
    health_checks: Option<JoinHandle<()>>,
}

impl Client {
    /// Builds a client sending requests over reqwest. Health checks, when configured, run on the
    /// current tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::with_timeouts(
            config.service.connect_timeout(),
            config.service.request_timeout(),
        )?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let service = config.service.name.clone();
        let base = Url::parse(&config.service.uri)
            .map_err(|e| Error::invalid_uri(&config.service.uri, e))?;

        let mut routes = Vec::with_capacity(config.operations.len());
        for operation in &config.operations {
            let declared = ReturnType::parse(&operation.returns)?;
            routes.push((classify(&declared)?, route_path(operation)?));
        }

        let (mode, health_checks) = match &config.load_balancer {
            Some(lb_config) => {
                let (policy, health_checks) = load_balancing(&service, lb_config)?;
                (DispatchMode::LoadBalanced(policy), health_checks)
            }
            None => (DispatchMode::Direct, None),
        };

        let mut operations = HashMap::new();
        for (operation, (shape, path)) in config.operations.iter().zip(routes) {
            let bound = bind(operation, path, mode.clone(), Arc::clone(&transport), shape)?;
            if operations.insert(operation.name.clone(), bound).is_some() {
                return Err(Error::Config(format!(
                    "operation `{}` is declared twice",
                    operation.name
                )));
            }
            info!("Bound operation {}.{} as {:?}", service, operation.name, shape);
        }

        Ok(Self {
            service,
            base,
            operations,
            health_checks,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn shape_of(&self, operation: &str) -> Option<ResultShape> {
        self.operations
            .get(operation)
            .map(|bound| bound.dispatcher.shape())
    }

    /// Builds the logical request of an operation and dispatches it.
    pub fn call(&self, operation: &str, args: CallArgs) -> Result<AsyncResult> {
        let bound = self
            .operations
            .get(operation)
            .ok_or_else(|| Error::UnknownOperation(operation.to_string()))?;

        let request = self.logical_request(bound, args)?;
        Ok(bound.dispatcher.dispatch(request))
    }

    fn logical_request(&self, bound: &BoundOperation, args: CallArgs) -> Result<HttpRequest> {
        let path = expand_path(&bound.path, &args.path_params)?;

        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        if !args.query.is_empty() {
            url.query_pairs_mut().extend_pairs(args.query.iter());
        }

        let mut request = HttpRequest::new(bound.method.clone(), url).with_headers(args.headers);
        request.body = args.body;
        Ok(request)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(health_checks) = self.health_checks.take() {
            health_checks.abort();
        }
    }
}

fn load_balancing(
    service: &str,
    config: &LoadBalancerConfig,
) -> Result<(Arc<RetryingPolicy>, Option<JoinHandle<()>>)> {
    let endpoints = config.endpoints()?;
    info!("Load balancing {} over {} servers", service, endpoints.len());

    let mut round_robin = RoundRobinLoadBalancer::new(service, endpoints);
    let interval = config.health_check_interval();
    if interval.is_some() {
        round_robin = round_robin.with_probe(HealthProbe::new(
            reqwest::Client::new(),
            config.health_check_path.clone(),
        ));
    }
    let load_balancer: Arc<dyn LoadBalancer> = Arc::new(round_robin);

    let health_checks = match interval {
        Some(interval) => {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(Error::Config(
                    "health checks need a running tokio runtime".to_string(),
                ));
            }
            Some(spawn_health_checks(Arc::clone(&load_balancer), interval))
        }
        None => None,
    };

    let policy = Arc::new(RetryingPolicy::new(load_balancer, config.retry_policy()));
    Ok((policy, health_checks))
}

fn bind(
    operation: &OperationConfig,
    path: String,
    mode: DispatchMode,
    transport: Arc<dyn Transport>,
    shape: ResultShape,
) -> Result<BoundOperation> {
    let method = Method::from_bytes(operation.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| {
            Error::Config(format!(
                "invalid method `{}` for operation `{}`",
                operation.method, operation.name
            ))
        })?;

    Ok(BoundOperation {
        method,
        path,
        dispatcher: Dispatcher::new(mode, transport, shape),
    })
}

/// Path template of an operation with a leading '/'. Query strings and fragments are refused,
/// query parameters are passed with each call instead.
fn route_path(operation: &OperationConfig) -> Result<String> {
    if operation.path.contains(&['?', '#'][..]) {
        return Err(Error::Config(format!(
            "path `{}` of operation `{}` must not carry a query or fragment",
            operation.path, operation.name
        )));
    }

    if operation.path.starts_with('/') {
        Ok(operation.path.clone())
    } else {
        Ok(format!("/{}", operation.path))
    }
}

/// Replaces every `{name}` segment of a path template with its percent-encoded value.
fn expand_path(template: &str, params: &[(String, String)]) -> Result<String> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .map(|close| open + close)
            .ok_or_else(|| Error::invalid_uri(template, "unterminated path parameter"))?;
        let name = &rest[open + 1..close];
        let value = params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                Error::invalid_uri(template, format!("missing path parameter `{}`", name))
            })?;

        path.push_str(&rest[..open]);
        path.push_str(&urlencoding::encode(value));
        rest = &rest[close + 1..];
    }
    path.push_str(rest);

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_result::{Payload, ResponseStream};
    use futures::{stream, StreamExt};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct EchoTransport {
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl Transport for EchoTransport {
        fn send(&self, request: HttpRequest) -> ResponseStream {
            let url = request.url.to_string();
            self.sent.lock().unwrap().push(request);
            stream::iter(vec![Ok(Payload::String(url)), Ok(json!("second"))]).boxed()
        }
    }

    fn config(extra: &str) -> Config {
        format!(
            r#"
            [service]
            name = "items"
            uri = "http://items-service/v1/"
            {extra}

            [[operations]]
            name = "list_items"
            path = "/api/items"
            returns = "Stream<Item>"

            [[operations]]
            name = "get_item"
            path = "/api/items/{{id}}"
            returns = "Future<Item>"
            "#
        )
        .parse()
        .unwrap()
    }

    fn echo_client() -> Client {
        Client::with_transport(&config(""), Arc::new(EchoTransport::default())).unwrap()
    }

    #[tokio::test]
    async fn operations_are_bound_with_their_shape() {
        let client = echo_client();

        assert_eq!(client.service(), "items");
        assert_eq!(client.shape_of("list_items"), Some(ResultShape::Multiple));
        assert_eq!(client.shape_of("get_item"), Some(ResultShape::Single));
        assert_eq!(client.shape_of("delete_item"), None);
    }

    #[tokio::test]
    async fn calls_build_the_logical_request() {
        let transport = Arc::new(EchoTransport::default());
        let client = Client::with_transport(&config(""), transport.clone()).unwrap();

        let args = CallArgs {
            path_params: vec![("id".to_string(), "a b/7".to_string())],
            query: vec![("expand".to_string(), "true".to_string())],
            ..Default::default()
        };
        let values = client.call("get_item", args).unwrap().collect().await.unwrap();

        assert_eq!(
            values,
            vec![json!("http://items-service/v1/api/items/a%20b%2F7?expand=true")]
        );
        assert_eq!(transport.sent.lock().unwrap()[0].method, Method::GET);
    }

    #[tokio::test]
    async fn stream_operations_deliver_every_value() {
        let client = echo_client();

        let values = client
            .call("list_items", CallArgs::default())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn load_balanced_calls_reach_a_server() {
        let transport = Arc::new(EchoTransport::default());
        let lb = r#"
            [load_balancer]
            servers = ["10.0.0.5:8080"]
            health_check_interval_secs = 0
        "#;
        let client = Client::with_transport(&config(lb), transport).unwrap();

        let values = client
            .call("list_items", CallArgs::default())
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(values[0], json!("http://10.0.0.5:8080/v1/api/items"));
    }

    #[test]
    fn unsupported_shapes_prevent_binding() {
        let config: Config = r#"
            [service]
            name = "items"
            uri = "http://items-service"

            [[operations]]
            name = "list_items"
            path = "/api/items"
            returns = "Vec<Item>"
        "#
        .parse()
        .unwrap();

        let result = Client::with_transport(&config, Arc::new(EchoTransport::default()));
        assert!(matches!(result, Err(Error::UnsupportedReturnShape(_))));
    }

    #[test]
    fn paths_with_a_query_prevent_binding() {
        let config: Config = r#"
            [service]
            name = "items"
            uri = "http://items-service"

            [[operations]]
            name = "list_items"
            path = "/api/items?x=1"
            returns = "Stream<Item>"
        "#
        .parse()
        .unwrap();

        let result = Client::with_transport(&config, Arc::new(EchoTransport::default()));
        assert!(matches!(result, Err(Error::Config(message)) if message.contains("list_items")));
    }

    #[tokio::test]
    async fn unknown_operations_are_refused() {
        let client = echo_client();
        assert!(matches!(
            client.call("delete_item", CallArgs::default()),
            Err(Error::UnknownOperation(_))
        ));
    }

    #[test]
    fn path_parameters_must_be_provided() {
        let params = vec![
            ("tag".to_string(), "new".to_string()),
            ("id".to_string(), "7".to_string()),
        ];
        assert_eq!(
            expand_path("/items/{id}/tags/{tag}", &params).unwrap(),
            "/items/7/tags/new"
        );
        assert!(expand_path("/items/{id}", &[]).is_err());
        assert!(expand_path("/items/{id", &[("id".to_string(), "7".to_string())]).is_err());
    }
}
