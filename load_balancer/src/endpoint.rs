use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A concrete server chosen by the load balancer. For example: 10.0.0.5:8080
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP address, IPv6 addresses are stored without brackets.
    pub host: String,

    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host in the form expected inside a URI authority.
    pub fn uri_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uri_host(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::Config(format!("invalid server `{}`: {}", s, reason));

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Endpoint::new(host, port))
    }
}
