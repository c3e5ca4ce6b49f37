use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Network address of a store endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub(crate) fn connection_info(&self) -> redis::ConnectionInfo {
        let addr = match self {
            Endpoint::Tcp { host, port } => redis::ConnectionAddr::Tcp(host.clone(), *port),
            Endpoint::Unix(path) => redis::ConnectionAddr::Unix(path.clone()),
        };

        redis::ConnectionInfo {
            addr,
            redis: redis::RedisConnectionInfo::default(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `host:port`, `[v6addr]:port` or `unix:/path/to/socket`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("unix endpoint requires a socket path".to_string());
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid endpoint '{}', expected host:port", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("invalid endpoint '{}', empty host", s));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{}': {}", s, e))?;

        Ok(Endpoint::tcp(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Addressable store endpoint bound to one namespace.
///
/// Passed alongside the connection it describes; authentication state lives
/// on the client, not here.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub endpoint: Endpoint,
    pub namespace: String,
    pub password: Option<String>,
    pub label: String,
}

impl Target {
    pub fn new(endpoint: Endpoint, namespace: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            endpoint,
            namespace: namespace.into(),
            password: None,
            label: label.into(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.label, self.endpoint, self.namespace)
    }
}
