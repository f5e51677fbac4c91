//! Configuration file for agent identity and broker connection
//!
//! ```toml
//! [agent]
//! agent_type = "robot"
//! id = "r1"                       # optional, generated when absent
//!
//! [broker]
//! url = "mqtt://localhost:1883"
//! username_env = "TETHER_USERNAME" # optional
//! password_env = "TETHER_PASSWORD" # optional
//! keepalive_secs = 60
//! network_interface = "eth0"      # optional
//! ```

use crate::transport::{ConnectOptions, DEFAULT_KEEPALIVE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub broker: BrokerSection,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Role of the agent, first level of its output topics
    pub agent_type: String,
    /// Instance identifier; a random one is generated when absent
    pub id: Option<String>,
}

/// Broker connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://` or `mqtts://`
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    pub network_interface: Option<String>,
}

fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE.as_secs()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid agent type: {0}")]
    InvalidAgentType(String),
    #[error("Invalid agent ID format: {0}")]
    InvalidAgentId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.agent_type.is_empty() {
            return Err(ConfigError::InvalidAgentType(
                "agent_type must not be empty".to_string(),
            ));
        }
        if let Some(id) = &self.agent.id {
            validate_agent_id(id)?;
        }
        self.broker_options()?;
        Ok(())
    }

    /// Get broker username from environment variable
    pub fn broker_username(&self) -> Option<String> {
        get_env_var_optional(self.broker.username_env.as_deref())
    }

    /// Get broker password from environment variable
    pub fn broker_password(&self) -> Option<String> {
        get_env_var_optional(self.broker.password_env.as_deref())
    }

    fn broker_options(&self) -> Result<ConnectOptions, ConfigError> {
        ConnectOptions::from_broker_url(&self.broker.url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker.url.clone()))
    }

    /// Connection options for [`Agent::connect`](crate::Agent::connect).
    ///
    /// Credentials are read from the environment at call time. Credentials from
    /// the environment take precedence over any embedded in the URL.
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let mut options = self
            .broker_options()?
            .with_keepalive(Duration::from_secs(self.broker.keepalive_secs));

        if let Some(username) = self.broker_username() {
            options = options.with_credentials(username, self.broker_password());
        }
        if let Some(interface) = self.broker.network_interface.as_deref().filter(|i| !i.is_empty()) {
            options = options.with_network_interface(interface);
        }
        Ok(options)
    }
}

fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// An agent id becomes the second level of every output topic
fn validate_agent_id(agent_id: &str) -> Result<(), ConfigError> {
    if agent_id.is_empty() || agent_id.contains(['/', '+', '#']) {
        return Err(ConfigError::InvalidAgentId(format!(
            "Agent ID '{agent_id}' must be non-empty and contain no '/', '+' or '#'"
        )));
    }
    Ok(())
}
