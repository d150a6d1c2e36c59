//! Agent configuration.
//!
//! Values come from the daemon's command line (with environment fallbacks) and
//! are validated once at startup.

use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8008";
pub const DEFAULT_LOCATION: &str = "Local";
pub const DEFAULT_MAX_RECONNECTS: u32 = 1000;

/// Invalid configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    InvalidUrl(String),
    InvalidInterval(&'static str),
    EmptyNodeName,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUrl(url) => {
                write!(f, "invalid server URL {:?}: expected http:// or https://", url)
            }
            ConfigError::InvalidInterval(name) => write!(f, "{} must be greater than zero", name),
            ConfigError::EmptyNodeName => write!(f, "node name must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Session timings and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    /// Registration is resent when unconfirmed for this long.
    pub registration_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub report_interval: Duration,
    /// Delay of the first report after a (re)connect.
    pub first_report_delay: Duration,
    /// Delay of the first heartbeat after a (re)connect.
    pub first_heartbeat_delay: Duration,
    pub send_attempts: u32,
    pub report_retry_delay: Duration,
    pub probe_retry_delay: Duration,
    /// Consecutive failed connects before the agent gives up.
    pub max_reconnects: u32,
    pub shutdown_grace: Duration,
    pub registered_sleep: Duration,
    pub idle_sleep: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            registration_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            report_interval: Duration::from_secs(5),
            first_report_delay: Duration::from_secs(2),
            first_heartbeat_delay: Duration::from_secs(3),
            send_attempts: 3,
            report_retry_delay: Duration::from_millis(500),
            probe_retry_delay: Duration::from_millis(100),
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            shutdown_grace: Duration::from_secs(1),
            registered_sleep: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(500),
        }
    }
}

/// Everything the daemon needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub server_url: String,
    pub node_name: String,
    pub location: String,
    pub session: SessionConfig,
}

impl AgentConfig {
    pub fn new(server_url: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            node_name: node_name.into(),
            location: DEFAULT_LOCATION.to_string(),
            session: SessionConfig::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.server_url.trim();
        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .ok_or_else(|| ConfigError::InvalidUrl(self.server_url.clone()))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }

        if self.node_name.trim().is_empty() {
            return Err(ConfigError::EmptyNodeName);
        }

        let s = &self.session;
        for (name, value) in [
            ("reconnect interval", s.reconnect_interval),
            ("connect timeout", s.connect_timeout),
            ("registration timeout", s.registration_timeout),
            ("heartbeat interval", s.heartbeat_interval),
            ("report interval", s.report_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidInterval(name));
            }
        }
        if s.max_reconnects == 0 {
            return Err(ConfigError::InvalidInterval("max reconnects"));
        }
        if s.send_attempts == 0 {
            return Err(ConfigError::InvalidInterval("send attempts"));
        }
        Ok(())
    }
}

/// Host name used as the default node name.
pub fn default_node_name() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown-node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AgentConfig::new(DEFAULT_SERVER_URL, "node-1");
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.location, "Local");
        assert_eq!(config.session.report_interval, Duration::from_secs(5));
        assert_eq!(config.session.max_reconnects, 1000);
    }

    #[test]
    fn test_invalid_url() {
        for url in ["localhost:8008", "ftp://host", "http://", "https:///path", ""] {
            let config = AgentConfig::new(url, "node-1");
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidUrl(_))),
                "{} accepted",
                url
            );
        }
        assert_eq!(AgentConfig::new("https://monitor.example.com", "n").validate(), Ok(()));
    }

    #[test]
    fn test_empty_node_name() {
        let config = AgentConfig::new(DEFAULT_SERVER_URL, "  ");
        assert_eq!(config.validate(), Err(ConfigError::EmptyNodeName));
    }

    #[test]
    fn test_zero_interval() {
        let session = SessionConfig {
            heartbeat_interval: Duration::ZERO,
            ..SessionConfig::default()
        };
        let config = AgentConfig::new(DEFAULT_SERVER_URL, "node-1").with_session(session);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidInterval("heartbeat interval"))
        );
    }
}
