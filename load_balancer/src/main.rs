/*
 * Command line client sending one call of a service API through the load balanced dispatcher
 */
use clap::Parser;
use futures::StreamExt;
use lb_dispatch::{CallArgs, Client, Config};
use log::{error, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::error::Error;
use std::path::PathBuf;

/// Sends one call of a service API and prints every returned value as a JSON line
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Client configuration file
    #[arg(short, long, default_value = "client.toml")]
    config: PathBuf,

    /// Path parameter as name=value
    #[arg(short, long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,

    /// Query parameter as name=value
    #[arg(short, long, value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Header as name:value
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,

    /// Name of the operation to call
    operation: String,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got `{}`", s))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected name:value, got `{}`", s))
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, Box<dyn Error>> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }
    Ok(map)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init()?;

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    let client = Client::from_config(&config)?;
    info!("Calling {}.{}", client.service(), args.operation);

    let call = CallArgs {
        path_params: args.params,
        query: args.query,
        headers: header_map(&args.headers)?,
        body: args.body.map(Into::into),
    };

    let mut values = client.call(&args.operation, call)?.into_stream();
    while let Some(value) = values.next().await {
        match value {
            Ok(value) => println!("{}", value),
            Err(e) => {
                error!("Call to {} failed: {}", args.operation, e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
