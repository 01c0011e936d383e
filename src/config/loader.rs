use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::config::models::{ServerConfig, UpstreamProtocol};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for environment variable {name}: {message}")]
    InvalidEnv { name: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub async fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<ServerConfig> {
    let config_content = fs::read_to_string(path).await?;
    parse_config(&config_content)
}

pub fn parse_config(content: &str) -> ConfigResult<ServerConfig> {
    // serde_yaml rejects a completely empty document
    if content.trim().is_empty() {
        return Ok(ServerConfig::default());
    }
    let config: ServerConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

/// Loads the file when it exists, falls back to defaults otherwise, then
/// applies environment overrides.
pub async fn load_with_env<P: AsRef<Path>>(path: P) -> ConfigResult<ServerConfig> {
    let path = path.as_ref();
    let mut config = if fs::try_exists(path).await.unwrap_or(false) {
        load_config(path).await?
    } else {
        tracing::warn!(
            path = %path.display(),
            "Config file not found, using defaults and environment"
        );
        ServerConfig::default()
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Applies `PROXY_HOSTNAME`-style overrides. `lookup` returns the raw value of
/// a variable, if set.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("LISTEN_ADDR") {
        config.listen_addr = addr;
    }
    if let Some(hostname) = lookup("PROXY_HOSTNAME") {
        config.upstream.hostname = hostname.trim().to_string();
    }
    if let Some(protocol) = lookup("PROXY_PROTOCOL") {
        config.upstream.protocol = protocol
            .parse::<UpstreamProtocol>()
            .map_err(|message| ConfigError::InvalidEnv {
                name: "PROXY_PROTOCOL",
                message,
            })?;
    }

    let admission = &mut config.admission;
    for (name, slot) in [
        ("PATHNAME_REGEX", &mut admission.path_pattern),
        ("UA_WHITELIST_REGEX", &mut admission.user_agent_allow),
        ("UA_BLACKLIST_REGEX", &mut admission.user_agent_deny),
        ("IP_WHITELIST_REGEX", &mut admission.ip_allow),
        ("IP_BLACKLIST_REGEX", &mut admission.ip_deny),
        ("REGION_WHITELIST_REGEX", &mut admission.region_allow),
        ("REGION_BLACKLIST_REGEX", &mut admission.region_deny),
    ] {
        if let Some(value) = lookup(name) {
            *slot = non_empty(value);
        }
    }

    if let Some(url) = lookup("URL302") {
        config.rejection.redirect_url = non_empty(url);
    }
    if let Some(keep_path) = lookup("KEEP_PATH") {
        config.rejection.keep_path = parse_flag(&keep_path);
    }
    if let Some(debug) = lookup("DEBUG") {
        config.debug = parse_flag(&debug);
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
