use std::env;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::info;

pub const API_TOKEN_VAR: &str = "REPLICATE_API_TOKEN";
pub const API_BASE_VAR: &str = "REPLICATE_API_BASE";

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_token: String,
    /// Overrides the provider's default API root.
    pub api_base: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Config {
    /// Reads the process environment. A missing provider token is fatal.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(api_token) = lookup(API_TOKEN_VAR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            bail!("{API_TOKEN_VAR} is not set in the environment variables");
        };
        Ok(Self {
            host: try_load(&lookup, "HOST", "0.0.0.0")?,
            port: try_load(&lookup, "PORT", "3000")?,
            api_token,
            api_base: lookup(API_BASE_VAR)
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        });
    raw.parse()
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("invalid {key} value '{raw}'"))
}
