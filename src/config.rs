//! Command-line and environment configuration.

use crate::memos::MemoApiConfig;
use clap::{Parser, ValueEnum};
use reqwest::Url;
use thiserror::Error;

/// How the MCP server talks to its client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// One client over stdin/stdout
    #[default]
    Stdio,
    /// Many sessions over streamable HTTP
    Http,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid MEMO_API_URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "memos-mcp", version, about = "MCP server for the Memos note-taking API")]
pub struct Cli {
    /// Transport to serve MCP over
    #[arg(
        long,
        env = "MCP_TRANSPORT",
        value_enum,
        ignore_case = true,
        default_value_t = TransportMode::Stdio
    )]
    pub transport: TransportMode,

    /// Listen host for HTTP mode
    #[arg(long, env = "MCP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listen port for HTTP mode
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Allowed Host header values (comma-separated). Empty allows all.
    #[arg(long, env = "ALLOWED_HOSTS", value_delimiter = ',')]
    pub allowed_hosts: Vec<String>,

    /// Base URL of the Memos server, e.g. https://memos.example.com
    #[arg(long, env = "MEMO_API_URL")]
    pub memo_api_url: Option<String>,

    /// Memos access token
    #[arg(long, env = "MEMO_ACCESS_TOKEN", hide_env_values = true)]
    pub memo_access_token: Option<String>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    pub allowed_hosts: Vec<String>,
    pub memo: MemoApiConfig,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let base_url = required(cli.memo_api_url, "MEMO_API_URL")?;
        let access_token = required(cli.memo_access_token, "MEMO_ACCESS_TOKEN")?;

        let parsed = Url::parse(&base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: base_url,
                reason: "scheme must be http or https".to_string(),
            });
        }

        let allowed_hosts = cli
            .allowed_hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        Ok(Config {
            transport: cli.transport,
            host: cli.host,
            port: cli.port,
            allowed_hosts,
            memo: MemoApiConfig {
                base_url,
                access_token,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli {
            transport: TransportMode::Stdio,
            host: "127.0.0.1".to_string(),
            port: 3000,
            allowed_hosts: Vec::new(),
            memo_api_url: Some("https://memos.example.com".to_string()),
            memo_access_token: Some("secret".to_string()),
        }
    }

    #[test]
    fn valid_configuration() {
        let mut cli = cli();
        cli.allowed_hosts = vec![" localhost ".to_string(), String::new()];
        let config = Config::try_from(cli).unwrap();
        assert_eq!(config.allowed_hosts, vec!["localhost".to_string()]);
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.memo.access_token, "secret");
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let mut no_url = cli();
        no_url.memo_api_url = None;
        assert_eq!(
            Config::try_from(no_url).unwrap_err(),
            ConfigError::Missing("MEMO_API_URL")
        );

        let mut blank_token = cli();
        blank_token.memo_access_token = Some("  ".to_string());
        assert_eq!(
            Config::try_from(blank_token).unwrap_err(),
            ConfigError::Missing("MEMO_ACCESS_TOKEN")
        );
    }

    #[test]
    fn url_must_be_http() {
        let mut bad = cli();
        bad.memo_api_url = Some("ftp://memos.example.com".to_string());
        assert!(matches!(
            Config::try_from(bad),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "memos-mcp",
            "--transport",
            "HTTP",
            "--port",
            "8080",
            "--allowed-hosts",
            "a.example,b.example",
            "--memo-api-url",
            "http://localhost:5230",
            "--memo-access-token",
            "t",
        ])
        .unwrap();
        assert_eq!(cli.transport, TransportMode::Http);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.allowed_hosts, vec!["a.example", "b.example"]);
    }
}
