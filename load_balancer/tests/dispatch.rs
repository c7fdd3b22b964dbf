use std::net::TcpListener;
use std::time::Duration;

use lb_dispatch::health::{Health, HealthProbe};
use lb_dispatch::load_balancer::LoadBalancer;
use lb_dispatch::round_robin_load_balancer::RoundRobinLoadBalancer;
use lb_dispatch::{
    AsyncResult, CallArgs, Client, Config, Endpoint, Error, ResultShape, TransportError,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPERATIONS: &str = r#"
[[operations]]
name = "list_items"
path = "/api/items"
returns = "Stream<Item>"

[[operations]]
name = "get_item"
path = "/api/items/{id}"
returns = "Future<Item>"
"#;

fn server_of(mock: &MockServer) -> String {
    mock.address().to_string()
}

/// Address nothing listens on.
fn closed_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn balanced_config(servers: &[String], max_retries_next_server: u32) -> Config {
    let servers: Vec<String> = servers.iter().map(|s| format!("\"{}\"", s)).collect();
    format!(
        r#"
        [service]
        name = "items"
        uri = "http://items-service"
        connect_timeout_ms = 500

        [load_balancer]
        servers = [{}]
        max_retries_next_server = {}
        health_check_interval_secs = 0

        {}
        "#,
        servers.join(", "),
        max_retries_next_server,
        OPERATIONS
    )
    .parse()
    .unwrap()
}

async fn items_server(name: &str) -> MockServer {
    let mock = MockServer::start().await;
    let body = format!(
        "{}\n{}\n",
        json!({"id": 1, "server": name}),
        json!({"id": 2, "server": name})
    );
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/stream+json"))
        .mount(&mock)
        .await;
    mock
}

#[tokio::test]
async fn stream_calls_are_spread_over_servers() {
    let one = items_server("one").await;
    let two = items_server("two").await;
    let config = balanced_config(&[server_of(&one), server_of(&two)], 0);
    let client = Client::from_config(&config).unwrap();
    assert_eq!(client.shape_of("list_items"), Some(ResultShape::Multiple));

    let first = client.call("list_items", CallArgs::default()).unwrap().collect().await.unwrap();
    let second = client.call("list_items", CallArgs::default()).unwrap().collect().await.unwrap();

    assert_eq!(
        first,
        vec![json!({"id": 1, "server": "one"}), json!({"id": 2, "server": "one"})]
    );
    assert_eq!(
        second,
        vec![json!({"id": 1, "server": "two"}), json!({"id": 2, "server": "two"})]
    );
    assert_eq!(one.received_requests().await.unwrap().len(), 1);
    assert_eq!(two.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn single_calls_carry_path_query_and_headers() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items/42"))
        .and(query_param("expand", "tags"))
        .and(header("x-request-id", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&mock)
        .await;
    let client = Client::from_config(&balanced_config(&[server_of(&mock)], 0)).unwrap();

    let mut args = CallArgs {
        path_params: vec![("id".to_string(), "42".to_string())],
        query: vec![("expand".to_string(), "tags".to_string())],
        ..Default::default()
    };
    args.headers.insert("x-request-id", "abc".parse().unwrap());

    let AsyncResult::Single(item) = client.call("get_item", args).unwrap() else {
        panic!("expected a single result");
    };
    assert_eq!(item.await.unwrap(), Some(json!({"id": 42})));
}

#[tokio::test]
async fn unreachable_server_fails_over_to_the_next_one() {
    let live = items_server("live").await;
    let config = balanced_config(&[closed_server(), server_of(&live)], 1);
    let client = Client::from_config(&config).unwrap();

    let values = client.call("list_items", CallArgs::default()).unwrap().collect().await.unwrap();

    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["server"], "live");
}

#[tokio::test]
async fn unreachable_server_without_retries_is_a_transport_error() {
    let client = Client::from_config(&balanced_config(&[closed_server()], 0)).unwrap();

    let result = client.call("list_items", CallArgs::default()).unwrap().collect().await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Connect { .. }))
    ));
}

#[tokio::test]
async fn single_server_recovers_after_a_transient_failure() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items/1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&mock)
        .await;
    let client = Client::from_config(&balanced_config(&[server_of(&mock)], 0)).unwrap();
    let args = || CallArgs {
        path_params: vec![("id".to_string(), "1".to_string())],
        ..Default::default()
    };

    let first = client.call("get_item", args()).unwrap().collect().await;
    assert!(matches!(
        first,
        Err(Error::Transport(TransportError::Status { status, .. })) if status.as_u16() == 503
    ));

    for _ in 0..3 {
        let values = client.call("get_item", args()).unwrap().collect().await.unwrap();
        assert_eq!(values, vec![json!({"id": 1})]);
    }
}

#[tokio::test]
async fn error_statuses_are_not_retried() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such item"))
        .expect(1)
        .mount(&failing)
        .await;
    let other = items_server("other").await;
    let config = balanced_config(&[server_of(&failing), server_of(&other)], 1);
    let client = Client::from_config(&config).unwrap();

    let args = CallArgs {
        path_params: vec![("id".to_string(), "7".to_string())],
        ..Default::default()
    };
    let result = client.call("get_item", args).unwrap().collect().await;

    match result {
        Err(Error::Transport(TransportError::Status { status, body })) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(body, "no such item");
        }
        unexpected => panic!("unexpected result {:?}", unexpected),
    }
    assert!(other.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn without_load_balancer_requests_go_to_the_service_uri() {
    let mock = items_server("direct").await;
    let config: Config = format!(
        r#"
        [service]
        name = "items"
        uri = "{}"

        {}
        "#,
        mock.uri(),
        OPERATIONS
    )
    .parse()
    .unwrap();
    let client = Client::from_config(&config).unwrap();

    let values = client.call("list_items", CallArgs::default()).unwrap().collect().await.unwrap();

    assert_eq!(values[1], json!({"id": 2, "server": "direct"}));
}

#[tokio::test]
async fn slow_servers_can_be_abandoned() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&slow)
        .await;
    let client = Client::from_config(&balanced_config(&[server_of(&slow)], 0)).unwrap();

    let args = CallArgs {
        path_params: vec![("id".to_string(), "1".to_string())],
        ..Default::default()
    };
    let AsyncResult::Single(item) = client.call("get_item", args).unwrap() else {
        panic!("expected a single result");
    };

    let abandoned = tokio::time::timeout(Duration::from_millis(200), item).await;
    assert!(abandoned.is_err());
}

#[tokio::test]
async fn health_checks_mark_unreachable_servers() {
    let live = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&live)
        .await;
    let live_endpoint: Endpoint = server_of(&live).parse().unwrap();
    let dead_endpoint: Endpoint = closed_server().parse().unwrap();

    let endpoints = vec![dead_endpoint.clone(), live_endpoint.clone()];
    let lb = RoundRobinLoadBalancer::new("items", endpoints)
        .with_probe(HealthProbe::new(reqwest::Client::new(), "health"));
    lb.check_endpoints_healths().await;

    assert_eq!(lb.health_of(&dead_endpoint).await, Some(Health::Unhealthy));
    assert_eq!(lb.health_of(&live_endpoint).await, Some(Health::Healthy));
    assert_eq!(lb.next_available_endpoint().await.unwrap(), live_endpoint);
    assert_eq!(lb.next_available_endpoint().await.unwrap(), live_endpoint);
}
