use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration for the demo service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name of the cookie carrying the local session ID.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Session lifetime in seconds. Applies to the cookie and the server-side entry.
    #[serde(default = "default_session_duration")]
    pub session_duration_secs: u64,

    /// Set the Secure flag on the session cookie.
    /// Enable whenever the service provider is reached over HTTPS.
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_cookie: default_session_cookie(),
            session_duration_secs: default_session_duration(),
            secure_cookies: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_cookie.is_empty() {
            return Err(ConfigError::Validation(
                "server.session_cookie must not be empty".into(),
            ));
        }
        if self.session_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "server.session_duration_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    3000
}

fn default_session_cookie() -> String {
    "__saml_sp_session".to_string()
}

fn default_session_duration() -> u64 {
    8 * 60 * 60
}
