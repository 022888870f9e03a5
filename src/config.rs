use anyhow::{bail, Context, Result};

use crate::credential::CredentialMode;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_IMAGE_SIZE: &str = "2K";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub key_mode: CredentialMode,
    pub analysis_model: String,
    pub image_model: String,
    pub image_size: String,
    pub port: u16,
}

impl Config {
    /// Reads `.env` first, then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let key_mode = match get("ZENLOGO_KEY_MODE") {
            Some(raw) => raw
                .parse::<CredentialMode>()
                .map_err(anyhow::Error::msg)
                .context("invalid ZENLOGO_KEY_MODE")?,
            None => CredentialMode::Environment,
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("invalid PORT '{raw}'"))?,
            None => 8080,
        };

        let image_size = get("ZENLOGO_IMAGE_SIZE").unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string());
        if !matches!(image_size.as_str(), "1K" | "2K" | "4K") {
            bail!("invalid ZENLOGO_IMAGE_SIZE '{image_size}' (expected 1K, 2K or 4K)");
        }

        Ok(Self {
            api_key: get("GEMINI_API_KEY").or_else(|| get("API_KEY")),
            api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            key_mode,
            analysis_model: get("ZENLOGO_ANALYSIS_MODEL").unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string()),
            image_model: get("ZENLOGO_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            image_size,
            port,
        })
    }
}
