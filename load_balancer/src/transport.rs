use std::fmt::Debug;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use log::{debug, error, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};

use crate::async_result::{Payload, ResponseStream};
use crate::error::{Error, Result, TransportError};
use crate::request::HttpRequest;

/// Content types whose bodies carry one JSON value per line.
const STREAMING_CONTENT_TYPES: [&str; 3] = [
    "application/stream+json",
    "application/x-ndjson",
    "application/jsonl",
];

/// Sends physical requests to servers. Implementations own connection handling, TLS and socket
/// level retries.
pub trait Transport: Send + Sync + Debug {
    /// Returns the values of the response in arrival order. The request must not be issued before
    /// the returned stream is polled.
    fn send(&self, request: HttpRequest) -> ResponseStream;
}

/// HTTP transport backed by a shared reqwest client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a transport with the given connect and total request timeouts.
    pub fn with_timeouts(connect: Option<Duration>, request: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(connect) = connect {
            builder = builder.connect_timeout(connect);
        }
        if let Some(request) = request {
            builder = builder.timeout(request);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build http client: {}", e)))?;

        Ok(Self::new(client))
    }

    async fn execute(client: Client, request: HttpRequest) -> Result<ResponseStream> {
        info!("Sending {} request to {}", request.method, request.url);
        let start_time = std::time::Instant::now();

        let mut builder = client
            .request(request.method, request.url.clone())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await;

        let elapsed_time_ms = start_time.elapsed().as_millis();
        debug!("request to {} took {}ms", request.url, elapsed_time_ms);

        let response = response.map_err(|e| {
            error!("Failed to send request to {}: {:?}", request.url, e);
            TransportError::from_reqwest(&request.url, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(TransportError::Status { status, body }.into());
        }

        Ok(decode_response(response))
    }
}

/// Body of an error response, empty when it cannot be read.
async fn error_body(response: Response) -> String {
    let url = response.url().clone();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read error body from {}: {:?}", url, e);
            String::new()
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> ResponseStream {
        let client = self.client.clone();

        stream::once(Self::execute(client, request))
            .try_flatten()
            .boxed()
    }
}

fn is_streaming(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let essence = value.split(';').next().unwrap_or_default().trim();
            STREAMING_CONTENT_TYPES
                .iter()
                .any(|streaming| essence.eq_ignore_ascii_case(streaming))
        })
        .unwrap_or(false)
}

fn decode_response(response: Response) -> ResponseStream {
    if is_streaming(&response) {
        let body = response.bytes_stream().map_err(TransportError::Body).boxed();
        return decode_lines(body);
    }

    stream::once(read_whole_body(response))
        .filter_map(|value| async move { value.transpose() })
        .boxed()
}

async fn read_whole_body(response: Response) -> Result<Option<Payload>> {
    let body = response.bytes().await.map_err(TransportError::Body)?;
    decode_value(&body)
}

/// A whole body is one value: JSON when it parses, the raw text otherwise. An empty body has no
/// value at all.
fn decode_value(body: &[u8]) -> Result<Option<Payload>> {
    let body = body.trim_ascii();
    if body.is_empty() {
        return Ok(None);
    }

    match serde_json::from_slice(body) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(Some(Payload::String(
            String::from_utf8_lossy(body).into_owned(),
        ))),
    }
}

struct LineDecoder {
    body: BoxStream<'static, std::result::Result<Bytes, TransportError>>,
    buffer: BytesMut,
    finished: bool,
}

impl LineDecoder {
    fn next_line(&mut self) -> Option<BytesMut> {
        if let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            return Some(self.buffer.split_to(newline + 1));
        }
        if self.finished && !self.buffer.is_empty() {
            return Some(self.buffer.split());
        }
        None
    }
}

/// Splits a body into lines as chunks arrive and decodes every non-empty line as a JSON value.
fn decode_lines(
    body: BoxStream<'static, std::result::Result<Bytes, TransportError>>,
) -> ResponseStream {
    let decoder = LineDecoder {
        body,
        buffer: BytesMut::new(),
        finished: false,
    };

    stream::try_unfold(decoder, next_line_value).boxed()
}

async fn next_line_value(mut decoder: LineDecoder) -> Result<Option<(Payload, LineDecoder)>> {
    loop {
        if let Some(line) = decoder.next_line() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            let value = serde_json::from_slice(line).map_err(TransportError::Decode)?;
            return Ok(Some((value, decoder)));
        }
        if decoder.finished {
            return Ok(None);
        }

        match decoder.body.next().await {
            Some(chunk) => decoder.buffer.extend_from_slice(&chunk?),
            None => decoder.finished = true,
        }
    }
}
