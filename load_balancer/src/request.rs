use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::error::{Error, Result};

/// An outgoing HTTP request. Before routing it is addressed to a logical service URI, after
/// routing the same type carries the physical host and port of the chosen server.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Builds a request from a textual URI, which has to be absolute.
    pub fn parse(method: Method, uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::invalid_uri(uri, e))?;
        Ok(Self::new(method, url))
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}
