use super::command::Request;
use crate::error::ProtocolError;
use crate::target::Endpoint;
use async_trait::async_trait;
use redis::{AsyncConnectionConfig, Value};
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Request/response channel to one store endpoint
#[async_trait]
pub trait Transport: Send {
    /// Send one command and wait for its reply
    async fn execute(&mut self, request: &Request) -> Result<Value, ProtocolError>;

    /// Drop the current connection and open a fresh one.
    /// Connection-scoped state (authentication, selected namespace) is lost.
    async fn reconnect(&mut self) -> Result<(), ProtocolError>;
}

/// Connection timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,   // 5 seconds
            response_timeout_ms: 60000, // exports of a full segment can be slow
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Transport over a `redis` multiplexed connection (RESP on TCP or unix socket)
pub struct RedisTransport {
    endpoint: Endpoint,
    settings: ConnectionSettings,
    client: redis::Client,
    connection: Option<MultiplexedConnection>,
}

impl RedisTransport {
    /// Open a connection to `endpoint`
    pub async fn connect(
        endpoint: Endpoint,
        settings: ConnectionSettings,
    ) -> Result<Self, ProtocolError> {
        let client = redis::Client::open(endpoint.connection_info())?;

        let mut transport = Self {
            endpoint,
            settings,
            client,
            connection: None,
        };
        transport.open().await?;

        Ok(transport)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<(), ProtocolError> {
        debug!("Connecting to {}", self.endpoint);

        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(self.settings.connect_timeout())
            .set_response_timeout(self.settings.response_timeout());

        let connection = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        info!("Connected to {}", self.endpoint);
        self.connection = Some(connection);

        Ok(())
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn execute(&mut self, request: &Request) -> Result<Value, ProtocolError> {
        let connection = self.connection.as_mut().ok_or_else(|| {
            ProtocolError::Transport(format!("not connected to {}", self.endpoint))
        })?;

        let cmd = request.to_cmd();
        let result: redis::RedisResult<Value> = cmd.query_async(connection).await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = ProtocolError::from(e);
                if err.is_transient() {
                    // Never reuse a connection that failed mid-command
                    self.connection = None;
                }
                Err(err)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        self.connection = None;
        self.open().await
    }
}
