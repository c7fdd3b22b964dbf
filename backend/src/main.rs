/*
 * Demo items server that listens on a given port, used as a target of the dispatcher
 */
use clap::Parser;
use log::info;
use ntex::web;
use serde_json::json;
use simple_logger;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct State {
    name: String,
    times_called: u64,
}

impl State {
    fn new(name: String) -> Self {
        State {
            name,
            times_called: 0,
        }
    }
}

/// Demo items server that listens on a given port and serves items tagged with its name
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port on which to run the server
    #[arg(short, long, default_value = "8081")]
    port: u16,

    /// Name of the server, added to every item
    #[arg(short, long, default_value = "items-backend")]
    name: String,
}

/// Logs the request line and headers, and returns the server name.
fn record_call(state: &Arc<Mutex<State>>, request: &web::HttpRequest) -> String {
    info!(
        "{} {} {:?}",
        request.head().method,
        request.head().uri,
        request.head().version
    );
    for (key, value) in request.headers().iter() {
        info!("{}: {}", key, value.to_str().unwrap_or("<binary>"));
    }

    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.times_called += 1;
    info!("Server has been called {} times", state.times_called);
    state.name.clone()
}

fn item(id: u32, server: &str) -> serde_json::Value {
    json!({ "id": id, "name": format!("item-{}", id), "server": server })
}

/// Number of items requested with `?count=`, 3 by default.
fn requested_count(request: &web::HttpRequest) -> u32 {
    request
        .uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.strip_prefix("count="))
        .find_map(|count| count.parse().ok())
        .unwrap_or(3)
}

#[web::get("/")]
async fn index(
    state: web::types::State<Arc<Mutex<State>>>,
    request: web::HttpRequest,
) -> Result<String, web::Error> {
    let name = record_call(&state, &request);
    info!("Replied with a hello message from {}", name);

    Ok(format!("Hello from backend server: {}", name))
}

#[web::get("/api/items")]
async fn list_items(
    state: web::types::State<Arc<Mutex<State>>>,
    request: web::HttpRequest,
) -> web::HttpResponse {
    let name = record_call(&state, &request);

    let body: String = (1..=requested_count(&request))
        .map(|id| format!("{}\n", item(id, &name)))
        .collect();

    web::HttpResponse::Ok()
        .content_type("application/stream+json")
        .body(body)
}

#[web::get("/api/items/{id}")]
async fn get_item(
    state: web::types::State<Arc<Mutex<State>>>,
    id: web::types::Path<u32>,
    request: web::HttpRequest,
) -> web::HttpResponse {
    let name = record_call(&state, &request);

    web::HttpResponse::Ok()
        .content_type("application/json")
        .body(item(id.into_inner(), &name).to_string())
}

#[web::get("/health")]
async fn health_check(request: web::HttpRequest) -> Result<String, web::Error> {
    info!(
        "Received health check request from {}",
        request.connection_info().remote().unwrap_or("unknown")
    );

    Ok("".to_string())
}

#[ntex::main]
async fn main() -> std::io::Result<()> {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    let args = Args::parse();
    let state = Arc::new(Mutex::new(State::new(args.name.clone())));

    web::HttpServer::new(move || {
        web::App::new()
            .state(state.clone())
            .service(index)
            .service(list_items)
            .service(get_item)
            .service(health_check)
    })
    .bind(("127.0.0.1", args.port))?
    .run()
    .await
}
