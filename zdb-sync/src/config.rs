use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{SyncError, SyncResult};
use crate::protocol::ConnectionSettings;
use crate::sync::{BulkConfig, PollConfig, RetryPolicy, Strategy, SyncOptions};
use crate::target::{Endpoint, Target};

/// Main configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub bulk: BulkConfig,
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// One master/slave pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    pub namespace: String,
    pub master: TargetConfig,
    pub slave: TargetConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub endpoint: Endpoint,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("endpoint", &self.endpoint)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl TargetConfig {
    fn target(&self, namespace: &str, label: String) -> Target {
        let target = Target::new(self.endpoint.clone(), namespace, label);
        match &self.password {
            Some(password) => target.with_password(password.clone()),
            None => target,
        }
    }
}

impl SessionConfig {
    pub fn master_target(&self) -> Target {
        self.master.target(&self.namespace, format!("{}/master", self.name))
    }

    pub fn slave_target(&self) -> Target {
        self.slave.target(&self.namespace, format!("{}/slave", self.name))
    }
}

impl SyncConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> SyncResult<Self> {
        let config: SyncConfig = serde_yaml::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.sessions.is_empty() {
            return Err(SyncError::Config("no sessions configured".to_string()));
        }

        let mut names = HashSet::new();
        for session in &self.sessions {
            if session.name.is_empty() {
                return Err(SyncError::Config("session name cannot be empty".to_string()));
            }
            if !names.insert(session.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate session name '{}'",
                    session.name
                )));
            }
            if session.namespace.is_empty() {
                return Err(SyncError::Config(format!(
                    "session '{}' has no namespace",
                    session.name
                )));
            }
            if session.master.endpoint == session.slave.endpoint {
                return Err(SyncError::Config(format!(
                    "session '{}' replicates {} onto itself",
                    session.name, session.master.endpoint
                )));
            }
        }

        self.options().validate()
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            poll: self.poll,
            retry: self.retry,
            bulk: self.bulk,
        }
    }
}
