//! Server configuration, parsed from the command line.

use clap::Parser;

/// The default host TreeKV binds to (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Server configuration
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "treekv", version)]
#[command(about = "In-memory key-value server backed by a binary search tree", long_about = None)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_only() {
        let config = ServerConfig::try_parse_from(["treekv", "7000"]).unwrap();
        assert_eq!(config, ServerConfig::new(DEFAULT_HOST, 7000));
        assert_eq!(config.bind_address(), "0.0.0.0:7000");
    }

    #[test]
    fn test_host_override() {
        let config =
            ServerConfig::try_parse_from(["treekv", "7000", "--host", "127.0.0.1"]).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:7000");
    }

    #[test]
    fn test_port_required_and_numeric() {
        assert!(ServerConfig::try_parse_from(["treekv"]).is_err());
        assert!(ServerConfig::try_parse_from(["treekv", "http"]).is_err());
        assert!(ServerConfig::try_parse_from(["treekv", "70000"]).is_err());
    }
}
