use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Embed position polling interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// `prev` restarts the current track instead of moving back once more
    /// than this much has played.
    #[serde(default = "default_prev_restart_secs")]
    pub prev_restart_secs: f64,
    /// Give up on a backend load after this long.
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Advance past tracks that have nothing to play.
    #[serde(default = "default_true")]
    pub skip_unplayable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default = "default_radio_batch")]
    pub batch_size: usize,
    /// Discovery term used when no preferred genre is set.
    #[serde(default = "default_fallback_term")]
    pub fallback_term: String,
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_discovery_limit")]
    pub limit: usize,
    #[serde(default = "default_country")]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lyrics_endpoint")]
    pub endpoint: String,
    /// Auto-follow resumes this long after the last manual scroll.
    #[serde(default = "default_scroll_quiet_ms")]
    pub scroll_quiet_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TOML file of `[[embed]]` artist/title → video id matches.
    #[serde(default = "default_catalog_file")]
    pub catalog_file: PathBuf,
    /// URL prefix the video id is appended to when handed to the embed host.
    #[serde(default = "default_watch_prefix")]
    pub watch_url_prefix: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            prev_restart_secs: default_prev_restart_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            history_cap: default_history_cap(),
            skip_unplayable: true,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            batch_size: default_radio_batch(),
            fallback_term: default_fallback_term(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_discovery_endpoint(),
            limit: default_discovery_limit(),
            country: default_country(),
        }
    }
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_lyrics_endpoint(),
            scroll_quiet_ms: default_scroll_quiet_ms(),
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            catalog_file: default_catalog_file(),
            watch_url_prefix: default_watch_prefix(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_tick_interval_ms() -> u64 {
    300
}

fn default_prev_restart_secs() -> f64 {
    3.0
}

fn default_load_timeout_secs() -> u64 {
    15
}

fn default_history_cap() -> usize {
    200
}

fn default_radio_batch() -> usize {
    5
}

fn default_fallback_term() -> String {
    "top hits".to_string()
}

fn default_discovery_timeout_secs() -> u64 {
    8
}

fn default_discovery_endpoint() -> String {
    "https://itunes.apple.com/search".to_string()
}

fn default_discovery_limit() -> usize {
    25
}

fn default_country() -> String {
    "US".to_string()
}

fn default_lyrics_endpoint() -> String {
    "https://lrclib.net/api/get".to_string()
}

fn default_scroll_quiet_ms() -> u64 {
    3000
}

fn default_catalog_file() -> PathBuf {
    platform::config_dir().join("embeds.toml")
}

fn default_watch_prefix() -> String {
    "https://www.youtube.com/watch?v=".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.playback.tick_interval_ms, 300);
        assert_eq!(config.playback.history_cap, 200);
        assert_eq!(config.radio.batch_size, 5);
        assert!(config.discovery.endpoint.starts_with("https://"));
        assert!(config.embed.catalog_file.ends_with("tunedeck/embeds.toml"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            "[radio]\nfallback_term = \"lofi\"\n\n[playback]\nprev_restart_secs = 5.0\n",
        )
        .unwrap();
        assert_eq!(config.radio.fallback_term, "lofi");
        assert_eq!(config.radio.batch_size, 5);
        assert_eq!(config.playback.prev_restart_secs, 5.0);
        assert_eq!(config.playback.load_timeout_secs, 15);
        assert!(config.lyrics.enabled);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.http.port, 8990);
        assert_eq!(back.lyrics.scroll_quiet_ms, 3000);
    }
}
