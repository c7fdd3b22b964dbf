use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::request::HttpRequest;

/// Routes a logical request to a concrete server. Only the host and port of the URI change; the
/// scheme, user info, path, query, fragment, method, headers and body are carried over untouched.
pub fn rewrite(request: &HttpRequest, endpoint: &Endpoint) -> Result<HttpRequest> {
    if endpoint.host.is_empty() {
        return Err(Error::invalid_route(&request.url, endpoint, "empty host"));
    }

    let mut url = request.url.clone();
    url.set_host(Some(&endpoint.uri_host()))
        .map_err(|e| Error::invalid_route(&request.url, endpoint, e))?;
    url.set_port(Some(endpoint.port))
        .map_err(|_| Error::invalid_route(&request.url, endpoint, "uri cannot carry a port"))?;

    Ok(HttpRequest {
        method: request.method.clone(),
        url,
        headers: request.headers.clone(),
        body: request.body.clone(),
    })
}
