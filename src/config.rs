use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::session::{MAX_VOLUME, MIN_VOLUME};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Slash commands register here when set

    // Moderation
    pub moderated_channels: Vec<u64>,

    // Lavalink
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,

    // Audio
    pub default_volume: u16,
    pub idle_timeout: Duration,
    pub max_history: usize,

    // Keep-alive
    pub keep_alive_port: u16,
    pub instance_id: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            moderated_channels: parse_channel_ids(
                &std::env::var("CHANNEL_IDS").unwrap_or_default(),
            ),

            // Lavalink
            lavalink_host: env_any(&["LAVALINK_HOST", "LAVALINK_IP"])
                .unwrap_or_else(|| "localhost".to_string()),
            lavalink_port: std::env::var("LAVALINK_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()
                .context("LAVALINK_PORT must be a port number")?,
            lavalink_password: env_any(&["LAVALINK_PASSWORD", "LAVALINK_PASS"])
                .unwrap_or_else(|| "youshallnotpass".to_string()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            idle_timeout: Duration::from_secs(
                std::env::var("IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
            ),
            max_history: std::env::var("MAX_HISTORY")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            // Keep-alive
            keep_alive_port: std::env::var("KEEP_ALIVE_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            instance_id: std::env::var("RENDER_INSTANCE_ID")
                .unwrap_or_else(|_| "local".to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Token must not be empty
    /// - Default volume must be within the playback range
    /// - Idle timeout must be greater than zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN is empty");
        }

        if !(MIN_VOLUME..=MAX_VOLUME).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between {} and {}, got: {}",
                MIN_VOLUME,
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        Ok(())
    }

    /// Base URL of the Lavalink REST API
    pub fn lavalink_http_url(&self) -> String {
        format!("http://{}:{}", self.lavalink_host, self.lavalink_port)
    }

    /// URL of the Lavalink event websocket
    pub fn lavalink_ws_url(&self) -> String {
        format!("ws://{}:{}/v4/websocket", self.lavalink_host, self.lavalink_port)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Secrets (token, Lavalink password) are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            Moderation: {} channel(s)\n  \
            Lavalink: {}:{}\n  \
            Audio: {}% vol, {} idle timeout, {} history\n  \
            Keep-alive: port {} ({})",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.moderated_channels.len(),
            self.lavalink_host,
            self.lavalink_port,
            self.default_volume,
            humantime::format_duration(self.idle_timeout),
            self.max_history,
            self.keep_alive_port,
            self.instance_id,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,
            moderated_channels: Vec::new(),
            lavalink_host: "localhost".into(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".into(),
            default_volume: 100,
            idle_timeout: Duration::from_secs(300),
            max_history: 50,
            keep_alive_port: 8080,
            instance_id: "local".into(),
        }
    }
}

/// Comma-separated channel ids; entries that are not plain digits are ignored
pub fn parse_channel_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|id| id.parse().ok())
        .collect()
}

fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> Config {
        Config {
            discord_token: "token".into(),
            ..Config::default()
        }
    }

    #[test]
    fn channel_ids_skip_garbage() {
        assert_eq!(
            parse_channel_ids(" 123, abc,456 ,,7x8, 900"),
            vec![123, 456, 900]
        );
        assert!(parse_channel_ids("").is_empty());
    }

    #[test]
    fn defaults_are_valid_once_a_token_is_set() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn volume_outside_range_is_rejected() {
        let config = Config {
            default_volume: 200,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = Config {
            default_volume: 5,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let config = Config {
            idle_timeout: Duration::ZERO,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lavalink_urls() {
        let config = Config {
            lavalink_host: "lava.local".into(),
            lavalink_port: 2444,
            ..valid()
        };
        assert_eq!(config.lavalink_http_url(), "http://lava.local:2444");
        assert_eq!(config.lavalink_ws_url(), "ws://lava.local:2444/v4/websocket");
    }

    #[test]
    fn summary_hides_secrets() {
        let summary = valid().summary();
        assert!(!summary.contains("token"));
        assert!(!summary.contains("youshallnotpass"));
        assert!(summary.contains("5m"));
    }
}
