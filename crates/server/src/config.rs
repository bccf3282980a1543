//! Command-line configuration.
//!
//! Every flag has an environment fallback so the server can run under a
//! service manager without arguments.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "hostbridge")]
#[command(about = "Bridges web pages to host capabilities over WebSockets")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HOSTBRIDGE_BIND", default_value = "127.0.0.1:4100")]
    pub bind: SocketAddr,

    /// Data directory (default: ~/.hostbridge)
    #[arg(long, env = "HOSTBRIDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Require this bearer token on every route except /health
    #[arg(long, env = "HOSTBRIDGE_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Endpoint that exchanges an account for an access token
    #[arg(long, env = "HOSTBRIDGE_TOKEN_ENDPOINT")]
    pub token_endpoint: Option<String>,

    /// Shell command that receives copied text on stdin
    #[arg(long, env = "HOSTBRIDGE_CLIPBOARD_COMMAND")]
    pub clipboard_command: Option<String>,

    /// Shell command confirming user presence (exit 0 = confirmed)
    #[arg(long, env = "HOSTBRIDGE_PRESENCE_COMMAND")]
    pub presence_command: Option<String>,

    /// Seconds to wait for the presence command
    #[arg(long, env = "HOSTBRIDGE_PRESENCE_TIMEOUT", default_value_t = 60)]
    pub presence_timeout_secs: u64,

    /// Shell command that opens a surface when none is connected
    #[arg(long, env = "HOSTBRIDGE_SURFACE_COMMAND")]
    pub surface_command: Option<String>,
}

impl Config {
    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_loopback() {
        let config = Config::try_parse_from(["hostbridge"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:4100".parse().unwrap());
        assert_eq!(config.presence_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "hostbridge",
            "--bind",
            "0.0.0.0:9000",
            "--data-dir",
            "/tmp/hb",
            "--presence-command",
            "true",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/hb")));
        assert_eq!(config.presence_command.as_deref(), Some("true"));
    }
}
