use crate::error::{Result, ScraperError};
use crate::types::TrendingCategory;
use serde::Deserialize;
use std::fs;

/// How duplicate appearances of the same video are collapsed.
/// `PerCountry` keeps one row per (videoId, country) with categories merged
/// within a country; `Global` keeps one row per videoId run-wide, tagged with
/// the first-observed country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    PerCountry,
    Global,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_countries")]
    pub countries: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Upper bound on concurrently running (country, category) feed tasks.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Attempts per feed page before the pair is marked incomplete.
    #[serde(default = "default_page_retry_attempts")]
    pub page_retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_requests_per_min")]
    pub requests_per_min: u64,
    /// Total call allowance for one run; hitting zero is a soft stop.
    #[serde(default = "default_quota_units")]
    pub quota_units: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_duplicate_policy")]
    pub duplicate_policy: DuplicatePolicy,
}

fn default_countries() -> Vec<String> {
    ["US", "CA", "AU", "FR"].iter().map(|s| s.to_string()).collect()
}
fn default_categories() -> Vec<String> {
    ["now", "music", "gaming", "movies"].iter().map(|s| s.to_string()).collect()
}
fn default_max_concurrent_fetches() -> usize {
    4
}
fn default_page_retry_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_max_batch_size() -> usize {
    crate::constants::MAX_IDS_PER_CALL
}
fn default_max_concurrent_batches() -> usize {
    2
}
fn default_requests_per_min() -> u64 {
    60
}
fn default_quota_units() -> u64 {
    10_000
}
fn default_output_dir() -> String {
    "data".to_string()
}
fn default_duplicate_policy() -> DuplicatePolicy {
    DuplicatePolicy::PerCountry
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            countries: default_countries(),
            categories: default_categories(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            page_retry_attempts: default_page_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            requests_per_min: default_requests_per_min(),
            quota_units: default_quota_units(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            duplicate_policy: default_duplicate_policy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrape: ScrapeConfig::default(),
            enrichment: EnrichmentConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        if !std::path::Path::new(config_path).exists() {
            return Ok(Config::default());
        }
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", config_path, e))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scrape.countries.is_empty() {
            return Err(ScraperError::Config("no countries configured".into()));
        }
        for name in &self.scrape.categories {
            if TrendingCategory::from_config_name(name).is_none() {
                return Err(ScraperError::Config(format!("unknown trending category '{name}'")));
            }
        }
        if self.enrichment.max_batch_size == 0
            || self.enrichment.max_batch_size > crate::constants::MAX_IDS_PER_CALL
        {
            return Err(ScraperError::Config(format!(
                "max_batch_size must be between 1 and {}",
                crate::constants::MAX_IDS_PER_CALL
            )));
        }
        Ok(())
    }

    /// Categories to request, parsed from the config names.
    pub fn requested_categories(&self) -> Vec<TrendingCategory> {
        self.scrape
            .categories
            .iter()
            .filter_map(|name| TrendingCategory::from_config_name(name))
            .collect()
    }

    /// The Data API key. Its absence before any fetching starts is the one
    /// unrecoverable configuration error for enrichment-bearing runs.
    pub fn api_key() -> Result<String> {
        match std::env::var("YOUTUBE_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ScraperError::Config(
                "YOUTUBE_API_KEY is not set; enrichment requires a Data API v3 key".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scrape.max_concurrent_fetches, 4);
        assert_eq!(config.enrichment.max_batch_size, 50);
        assert_eq!(config.output.duplicate_policy, DuplicatePolicy::PerCountry);
    }

    #[test]
    fn duplicate_policy_parses_kebab_case() {
        let config: Config =
            toml::from_str("[output]\nduplicate_policy = \"global\"\n").unwrap();
        assert_eq!(config.output.duplicate_policy, DuplicatePolicy::Global);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let config: Config =
            toml::from_str("[enrichment]\nmax_batch_size = 500\n").unwrap();
        assert!(config.validate().is_err());
    }
}
