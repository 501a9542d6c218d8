use std::env;
use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: String,
    /// File path or `http(s)` URL of a JSON rule table. Built-in rules when unset.
    pub rules_source: Option<String>,
    /// Seconds between rule refreshes; 0 disables the refresh loop.
    pub refresh_secs: u64,
    pub app_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            rules_source: None,
            refresh_secs: 86400,
            app_env: "development".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let server_addr = env::var("SERVER_ADDR").unwrap_or(defaults.server_addr);
        let rules_source = env::var("RULES_SOURCE").ok().filter(|s| !s.trim().is_empty());
        let refresh_secs = match env::var("RULES_REFRESH_SECS") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("RULES_REFRESH_SECS must be a number, got '{}'", v))?,
            Err(_) => defaults.refresh_secs,
        };
        let app_env = env::var("APP_ENV").unwrap_or(defaults.app_env);

        Ok(Self {
            server_addr,
            rules_source,
            refresh_secs,
            app_env,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.server_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("SERVER_ADDR '{}' is not a socket address", self.server_addr))?;

        if let Some(source) = &self.rules_source {
            if source.contains("://") && !(source.starts_with("http://") || source.starts_with("https://")) {
                bail!("RULES_SOURCE must be a file path or an http(s) URL, got '{}'", source);
            }
        }
        Ok(())
    }
}
