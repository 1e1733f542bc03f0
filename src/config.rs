use std::collections::HashMap;

use anyhow::{Context, Error};
use config::Config;

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub docker_socket: String,
    pub port: u16,
    pub env_file_path: String,
    pub db_path: String,
    /// Seconds between background poller passes.
    pub check_interval: u64,
    /// Seconds the health gate waits after an update.
    pub health_check_timeout: u64,
    /// History rows retained per container.
    pub history_limit: u32,
    pub allow_prerelease: bool,
    pub auto_update: bool,
    pub github_token: String,
    pub ntfy_endpoint: String,
    pub ntfy_topic: String,
    pub ntfy_token: String,
    pub ntfy_click_url: String,
    /// Legacy `container=VARIABLE` pairs, comma separated. Activates the
    /// env-file strategy for containers without labels.
    pub version_vars: String,
    /// `image-fragment=url` pairs, pipe separated, overriding changelog
    /// links.
    pub changelog_urls: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            port: 5000,
            env_file_path: "/env/.env".to_string(),
            db_path: "/data/versions.db".to_string(),
            check_interval: 21600,
            health_check_timeout: 60,
            history_limit: 5,
            allow_prerelease: false,
            auto_update: false,
            github_token: String::new(),
            ntfy_endpoint: String::new(),
            ntfy_topic: "DockerUpdate".to_string(),
            ntfy_token: String::new(),
            ntfy_click_url: String::new(),
            version_vars: String::new(),
            changelog_urls: String::new(),
        }
    }
}

fn parse_pairs(raw: &str, separator: char) -> HashMap<String, String> {
    raw.split(separator)
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

impl AppConfig {
    pub fn version_map(&self) -> HashMap<String, String> {
        parse_pairs(&self.version_vars, ',')
    }

    pub fn changelog_map(&self) -> HashMap<String, String> {
        parse_pairs(&self.changelog_urls, '|')
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(config::Environment::with_prefix("tugboat"))
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_vars_parse_to_map() {
        let config = AppConfig {
            version_vars: "radarr=RADARR_VER, sonarr=SONARR_VER".to_string(),
            ..AppConfig::default()
        };
        let map = config.version_map();
        assert_eq!(map.get("radarr").map(String::as_str), Some("RADARR_VER"));
        assert_eq!(map.get("sonarr").map(String::as_str), Some("SONARR_VER"));
    }

    #[test]
    fn changelog_urls_parse_with_pipe_separator() {
        let config = AppConfig {
            changelog_urls: "acme/widget=https://a.example/log?x=1|other=https://b.example"
                .to_string(),
            ..AppConfig::default()
        };
        let map = config.changelog_map();
        assert_eq!(
            map.get("acme/widget").map(String::as_str),
            Some("https://a.example/log?x=1")
        );
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn empty_strings_parse_to_empty_maps() {
        let config = AppConfig::default();
        assert!(config.version_map().is_empty());
        assert!(config.changelog_map().is_empty());
    }
}
