use clap::{Parser, ValueEnum};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Which front-end the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Streamable HTTP with `mcp-session-id` sessions.
    Http,
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Stdio => "stdio",
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "MCP bridge to a product/price REST API", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Base URL of the upstream REST API
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Front-end to serve
    #[arg(long, env = "MCP_TRANSPORT", value_enum)]
    pub transport: Option<Transport>,

    /// Host to bind (HTTP transport)
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (HTTP transport)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Upstream request timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS")]
    pub upstream_timeout_secs: Option<u32>,

    /// Evict HTTP sessions idle for longer than this many seconds
    #[arg(long, env = "SESSION_IDLE_TIMEOUT_SECS")]
    pub session_idle_timeout_secs: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub transport: Transport,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The validated base URL.
    pub fn url(&self) -> Result<Url, config::ConfigError> {
        parse_base_url(&self.base_url)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, config::ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(config::ConfigError::Message(
            "Missing BASE_URL env var".to_string(),
        ));
    }
    let url = Url::parse(raw)
        .map_err(|e| config::ConfigError::Message(format!("invalid BASE_URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(config::ConfigError::Message(format!(
            "BASE_URL must be an absolute http(s) URL, got '{raw}'"
        )));
    }
    Ok(url)
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        // 1. Defaults
        let mut builder = Config::builder()
            .set_default("transport", "http")?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 60)?
            .set_default("server.body_limit_bytes", 2 * 1024 * 1024)?
            .set_default("upstream.base_url", "")?
            .set_default("upstream.timeout_secs", 30)?
            .set_default("sessions.idle_timeout_secs", 30 * 60)?
            .set_default("sessions.sweep_interval_secs", 60)?;

        // 2. Config file: explicit path, else ./config.yaml when present
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        } else if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::new("config.yaml", FileFormat::Yaml));
        }

        // 3. Environment variables prefixed with BRIDGE_, e.g. BRIDGE_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("BRIDGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and the plain env vars clap reads for them)
        if let Some(base_url) = cli.base_url {
            builder = builder.set_override("upstream.base_url", base_url)?;
        }
        if let Some(transport) = cli.transport {
            builder = builder.set_override("transport", transport.as_str())?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(secs) = cli.upstream_timeout_secs {
            builder = builder.set_override("upstream.timeout_secs", i64::from(secs))?;
        }
        if let Some(secs) = cli.session_idle_timeout_secs {
            builder = builder.set_override("sessions.idle_timeout_secs", i64::from(secs))?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        self.upstream.url()?;
        // An upstream timeout must surface as a tool result, not as a 408.
        if self.upstream.timeout_secs >= self.server.request_timeout_secs {
            return Err(config::ConfigError::Message(format!(
                "upstream timeout ({}s) must be shorter than the HTTP request timeout ({}s)",
                self.upstream.timeout_secs, self.server.request_timeout_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_must_be_http() {
        assert!(parse_base_url("").is_err());
        assert!(parse_base_url("   ").is_err());
        assert!(parse_base_url("ftp://example.com").is_err());
        assert!(parse_base_url("mailto:ops@example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
        assert_eq!(
            parse_base_url(" https://example.com/api ").unwrap().as_str(),
            "https://example.com/api"
        );
    }

    #[test]
    fn missing_base_url_names_the_variable() {
        let err = parse_base_url("").unwrap_err();
        assert!(err.to_string().contains("Missing BASE_URL"));
    }
}
