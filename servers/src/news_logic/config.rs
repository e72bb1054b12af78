use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_common::{RelayConfig, UpstreamConfig, WelcomeMessage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Config file looked up in the working directory when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_news.conf";

const DEFAULT_PORT: u16 = 7777;
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_STATS_INTERVAL_SECONDS: u64 = 60;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "Tree of Alpha news relay: one upstream feed, many WebSocket subscribers", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "PORT", help = "Port to listen on for subscribers and health checks.")]
    pub port: Option<u16>,

    #[arg(long, env = "NEWS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "NEWS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "NEWS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error, fatal).")]
    pub log_level: Option<String>,

    #[arg(long, env = "TREE_OF_ALPHA_URL", help = "Upstream Tree of Alpha WebSocket URL.")]
    pub upstream_url: Option<String>,

    #[arg(long, env = "TREE_OF_ALPHA_API_KEY", hide_env_values = true, help = "Tree of Alpha API key. Free tier when empty.")]
    pub api_key: Option<String>,

    #[arg(long, env = "NEWS_USER_AGENT", help = "User-Agent header sent upstream.")]
    pub user_agent: Option<String>,

    #[arg(long, env = "NEWS_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds before reconnecting upstream.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "NEWS_STATS_INTERVAL_SECONDS", help = "Interval in seconds between stats log lines.")]
    pub stats_interval_seconds: Option<u64>,

    #[arg(long, env = "NEWS_WELCOME_TITLE", help = "Title of the welcome item sent on connect.")]
    pub welcome_title: Option<String>,

    #[arg(long, env = "NEWS_WELCOME_BODY", help = "Body of the welcome item sent on connect.")]
    pub welcome_body: Option<String>,

    #[arg(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Certificate and key for serving over TLS.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Fully resolved, validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: log::LevelFilter,
    pub relay: RelayConfig,
    pub stats_interval: Duration,
    pub tls: Option<TlsPaths>,
    /// The config file that was merged in, if any.
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Built-in defaults, the lowest-priority layer.
    pub fn defaults() -> Config {
        let upstream = UpstreamConfig::default();
        let welcome = WelcomeMessage::default();
        Config {
            port: Some(DEFAULT_PORT),
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            upstream_url: Some(upstream.url),
            user_agent: Some(upstream.user_agent),
            reconnect_delay_ms: Some(upstream.reconnect_delay.as_millis() as u64),
            stats_interval_seconds: Some(DEFAULT_STATS_INTERVAL_SECONDS),
            welcome_title: Some(welcome.title),
            welcome_body: Some(welcome.body),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            upstream_url: other.upstream_url.or(self.upstream_url),
            api_key: other.api_key.or(self.api_key),
            user_agent: other.user_agent.or(self.user_agent),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            stats_interval_seconds: other.stats_interval_seconds.or(self.stats_interval_seconds),
            welcome_title: other.welcome_title.or(self.welcome_title),
            welcome_body: other.welcome_body.or(self.welcome_body),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// Validates the merged layers and produces typed settings. Unset
    /// fields take the built-in defaults.
    pub fn resolve(self) -> Result<Settings> {
        let merged = Config::defaults().merge(self);
        let upstream_defaults = UpstreamConfig::default();

        let reconnect_delay = merged
            .reconnect_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(upstream_defaults.reconnect_delay);
        if reconnect_delay.is_zero() {
            bail!("reconnectDelayMs must be greater than zero");
        }
        let stats_interval_seconds = merged
            .stats_interval_seconds
            .unwrap_or(DEFAULT_STATS_INTERVAL_SECONDS);
        if stats_interval_seconds == 0 {
            bail!("statsIntervalSeconds must be greater than zero");
        }

        let tls = match (merged.tls_cert_path, merged.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsPaths { cert_path, key_path }),
            (None, None) => None,
            _ => bail!("tlsCertPath and tlsKeyPath must be set together"),
        };

        let welcome_defaults = WelcomeMessage::default();
        Ok(Settings {
            port: merged.port.unwrap_or(DEFAULT_PORT),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: parse_level(merged.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))?,
            relay: RelayConfig {
                upstream: UpstreamConfig {
                    url: merged.upstream_url.unwrap_or(upstream_defaults.url),
                    api_key: merged.api_key.filter(|key| !key.trim().is_empty()),
                    user_agent: merged.user_agent.unwrap_or(upstream_defaults.user_agent),
                    reconnect_delay,
                },
                welcome: WelcomeMessage {
                    title: merged.welcome_title.unwrap_or(welcome_defaults.title),
                    body: merged.welcome_body.unwrap_or(welcome_defaults.body),
                },
            },
            stats_interval: Duration::from_secs(stats_interval_seconds),
            tls,
            config_file: merged.config_path,
        })
    }
}

fn parse_level(level: &str) -> Result<log::LevelFilter> {
    if level.eq_ignore_ascii_case("fatal") {
        return Ok(log::LevelFilter::Error);
    }
    log::LevelFilter::from_str(level).map_err(|_| anyhow::anyhow!("unknown log level '{}'", level))
}

/// Reads command line and environment, then layers them over the config file.
pub fn load_config() -> Result<Config> {
    load_config_from(Config::parse())
}

/// Layering: built-in defaults < JSON config file < env / CLI (`cli`).
/// An explicitly named config file must exist; the default one is optional.
pub fn load_config_from(cli: Config) -> Result<Config> {
    let explicit = cli.config_path.is_some();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::default();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let mut file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        file_config.config_path = Some(config_file_path);
        current_config = current_config.merge(file_config);
    } else if explicit {
        bail!("Config file not found: {}", config_file_path.display());
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_resolve() {
        let settings = Config::default().resolve().unwrap();

        assert_eq!(settings.port, 7777);
        assert_eq!(settings.log_level, log::LevelFilter::Info);
        assert_eq!(settings.stats_interval, Duration::from_secs(60));
        assert_eq!(settings.relay.upstream.url, "wss://news.treeofalpha.com/ws");
        assert_eq!(settings.relay.upstream.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.relay.upstream.api_key, None);
        assert_eq!(settings.relay.welcome, WelcomeMessage::default());
        assert!(settings.tls.is_none());
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 9000, "logLevel": "debug", "apiKey": "from-file", "statsIntervalSeconds": 30}}"#
        )
        .unwrap();
        // Built as a literal so exported env vars cannot leak into the CLI layer.
        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(9100),
            ..Default::default()
        };

        let config = load_config_from(cli).unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.port, 9100);
        assert_eq!(settings.log_level, log::LevelFilter::Debug);
        assert_eq!(settings.stats_interval, Duration::from_secs(30));
        assert_eq!(settings.relay.upstream.api_key.as_deref(), Some("from-file"));
        assert_eq!(settings.config_file.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let cli = Config {
            config_path: Some(PathBuf::from("/definitely/not/here.conf")),
            ..Default::default()
        };
        let result = load_config_from(cli);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_delay = Config { reconnect_delay_ms: Some(0), ..Default::default() };
        assert!(zero_delay.resolve().is_err());

        let zero_stats = Config { stats_interval_seconds: Some(0), ..Default::default() };
        assert!(zero_stats.resolve().is_err());

        let bad_level = Config { log_level: Some("loud".into()), ..Default::default() };
        assert!(bad_level.resolve().is_err());

        let half_tls = Config { tls_cert_path: Some("cert.pem".into()), ..Default::default() };
        assert!(half_tls.resolve().is_err());
    }

    #[test]
    fn test_fatal_level_and_blank_api_key() {
        let config = Config {
            log_level: Some("FATAL".into()),
            api_key: Some("   ".into()),
            ..Default::default()
        };
        let settings = config.resolve().unwrap();
        assert_eq!(settings.log_level, log::LevelFilter::Error);
        assert!(!settings.relay.upstream.has_credential());
    }
}
