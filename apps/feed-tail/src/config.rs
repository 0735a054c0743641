use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use clap::Parser;
use feed_engine::{FeedConfig, SortMode};
use thiserror::Error;
use url::Url;

use crate::telemetry::DEFAULT_LOG_FILTER;

#[derive(Debug, Clone, Parser)]
#[command(name = "feed-tail", version, about = "Follow a live feed and serve its reconciled view")]
pub struct Cli {
    /// Server-sent events endpoint of the feed.
    #[arg(long, env = "FEED_STREAM_URL")]
    pub stream_url: String,

    /// Base URL of the feed REST API (pages, votes, posts).
    #[arg(long, env = "FEED_API_BASE")]
    pub api_base: String,

    /// Bearer token passed through to the stream and REST calls.
    #[arg(long, env = "FEED_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Author name of the local user; echoes of its own votes are recognised by it.
    #[arg(long, env = "FEED_VIEWER", default_value = "anonymous")]
    pub viewer: String,

    /// hot, new, top or active.
    #[arg(long, env = "FEED_SORT", default_value = "hot")]
    pub sort: String,

    #[arg(long, env = "FEED_PAGE_SIZE", default_value_t = 30)]
    pub page_size: usize,

    /// Seconds of stream silence before the connection is recycled.
    #[arg(long, env = "FEED_HEARTBEAT_SECS", default_value_t = 45)]
    pub heartbeat_secs: u64,

    /// Bus topic change records are published on.
    #[arg(long, env = "FEED_TOPIC", default_value = "feed")]
    pub topic: String,

    /// Address of the status/view HTTP listener.
    #[arg(long, env = "FEED_TAIL_ADDR", default_value = "127.0.0.1:8090")]
    pub listen_addr: String,

    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {value}: {source}")]
    ListenAddr {
        value: String,
        source: AddrParseError,
    },
    #[error("invalid {field} url {value}: {source}")]
    Url {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("invalid sort mode: {0}")]
    Sort(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub stream_url: Url,
    pub api_base: Url,
    pub token: Option<String>,
    pub feed: FeedConfig,
}

impl TryFrom<Cli> for AppConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let bind_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .map_err(|source| ConfigError::ListenAddr {
                value: cli.listen_addr.clone(),
                source,
            })?;
        let stream_url = parse_url("stream", &cli.stream_url)?;
        let api_base = parse_url("api", &cli.api_base)?;
        let sort: SortMode = cli.sort.parse().map_err(ConfigError::Sort)?;
        if cli.page_size == 0 {
            return Err(ConfigError::Zero { field: "page size" });
        }
        if cli.heartbeat_secs == 0 {
            return Err(ConfigError::Zero {
                field: "heartbeat timeout",
            });
        }

        let feed = FeedConfig {
            topic: cli.topic,
            viewer: cli.viewer,
            page_size: cli.page_size,
            sort,
            heartbeat_timeout: Duration::from_secs(cli.heartbeat_secs),
            ..FeedConfig::default()
        };
        Ok(AppConfig {
            bind_addr,
            log_filter: cli.log_filter,
            stream_url,
            api_base,
            token: cli.token.filter(|token| !token.is_empty()),
            feed,
        })
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url {
        field,
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(extra: &[&str]) -> Result<AppConfig, ConfigError> {
        let mut args = vec![
            "feed-tail",
            "--stream-url",
            "https://feed.example/stream",
            "--api-base",
            "https://feed.example/api",
        ];
        args.extend_from_slice(extra);
        AppConfig::try_from(Cli::try_parse_from(args).expect("cli"))
    }

    #[test]
    fn defaults_follow_feed_config() {
        let cfg = cli(&["--viewer", "me"]).expect("config");
        assert_eq!(cfg.feed.viewer, "me");
        assert_eq!(cfg.feed.page_size, 30);
        assert_eq!(cfg.feed.sort, SortMode::Hot);
        assert_eq!(cfg.feed.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(cfg.bind_addr.port(), 8090);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(cli(&["--sort", "best"]), Err(ConfigError::Sort(_))));
        assert!(matches!(
            cli(&["--listen-addr", "nowhere"]),
            Err(ConfigError::ListenAddr { .. })
        ));
        assert!(matches!(cli(&["--page-size", "0"]), Err(ConfigError::Zero { .. })));
    }

    #[test]
    fn empty_token_is_no_token() {
        let cfg = cli(&["--token", ""]).expect("config");
        assert!(cfg.token.is_none());
    }
}
