//! Pipeline configuration.
//!
//! Built in code with the `with_*` builders, or from `MEDIA_*` environment
//! variables (a `.env` file is honoured during development).

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::RemoteBrowserCredentials;
use crate::error::ConfigError;
use crate::extractors::chain::DEFAULT_ADDRESS_MATCH_FLOOR;
use crate::extractors::SiteProfile;
use crate::lease::LeaseOptions;
use crate::processing::StandardizeOptions;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;

/// Configuration for an extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of every store and the `processed/` tree
    pub base_dir: PathBuf,

    /// Sources to run; empty enables every configured extractor
    pub enabled_sources: Vec<String>,

    pub max_concurrent_properties: usize,

    /// pHash Hamming distance at or below which images are reported as near duplicates
    pub deduplication_threshold: u32,

    pub max_dimension: u32,
    pub min_dimension: u32,

    /// Image worker threads; `None` picks one fewer than the core count
    pub worker_threads: Option<usize>,

    pub address_match_floor: f64,

    /// `in_progress` entries older than this are reset on resume
    pub staleness_window: Duration,

    pub max_images_per_property: usize,

    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub property_lease: LeaseOptions,
    pub manifest_lease: LeaseOptions,

    /// JSON array of site profiles
    pub site_profiles_path: Option<PathBuf>,

    #[serde(skip)]
    pub remote_browser: Option<RemoteBrowserCredentials>,

    /// JSON array of properties, used by the binary
    pub properties_file: Option<PathBuf>,

    pub resume: bool,
    pub force: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data/property_images"),
            enabled_sources: Vec::new(),
            max_concurrent_properties: 3,
            deduplication_threshold: 8,
            max_dimension: 1024,
            min_dimension: 100,
            worker_threads: None,
            address_match_floor: DEFAULT_ADDRESS_MATCH_FLOOR,
            staleness_window: Duration::from_secs(30 * 60),
            max_images_per_property: 50,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            property_lease: LeaseOptions::property(),
            manifest_lease: LeaseOptions::manifest(),
            site_profiles_path: None,
            remote_browser: None,
            properties_file: None,
            resume: true,
            force: false,
        }
    }
}

impl PipelineConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_enabled_sources(mut self, sources: Vec<String>) -> Self {
        self.enabled_sources = sources;
        self
    }

    pub fn with_max_concurrent_properties(mut self, n: usize) -> Self {
        self.max_concurrent_properties = n;
        self
    }

    pub fn with_deduplication_threshold(mut self, threshold: u32) -> Self {
        self.deduplication_threshold = threshold;
        self
    }

    pub fn with_max_dimension(mut self, px: u32) -> Self {
        self.max_dimension = px;
        self
    }

    pub fn with_min_dimension(mut self, px: u32) -> Self {
        self.min_dimension = px;
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = Some(n);
        self
    }

    pub fn with_address_match_floor(mut self, floor: f64) -> Self {
        self.address_match_floor = floor;
        self
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    pub fn with_max_images_per_property(mut self, n: usize) -> Self {
        self.max_images_per_property = n;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_property_lease(mut self, options: LeaseOptions) -> Self {
        self.property_lease = options;
        self
    }

    pub fn with_manifest_lease(mut self, options: LeaseOptions) -> Self {
        self.manifest_lease = options;
        self
    }

    pub fn with_site_profiles_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.site_profiles_path = Some(path.into());
        self
    }

    pub fn with_remote_browser(mut self, credentials: RemoteBrowserCredentials) -> Self {
        self.remote_browser = Some(credentials);
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Standardization settings derived from this config.
    pub fn standardize_options(&self) -> StandardizeOptions {
        StandardizeOptions {
            max_dimension: self.max_dimension,
            min_dimension: self.min_dimension,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("MEDIA_BASE_DIR") {
            config.base_dir = PathBuf::from(dir);
        }
        if let Some(sources) = get("MEDIA_SOURCES") {
            config.enabled_sources = sources
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(n) = parse(&get, "MEDIA_MAX_CONCURRENT")? {
            config.max_concurrent_properties = n;
        }
        if let Some(n) = parse(&get, "MEDIA_DEDUP_THRESHOLD")? {
            config.deduplication_threshold = n;
        }
        if let Some(n) = parse(&get, "MEDIA_MAX_DIMENSION")? {
            config.max_dimension = n;
        }
        if let Some(n) = parse(&get, "MEDIA_MIN_DIMENSION")? {
            config.min_dimension = n;
        }
        config.worker_threads = parse(&get, "MEDIA_WORKERS")?;
        if let Some(f) = parse(&get, "MEDIA_ADDRESS_MATCH_FLOOR")? {
            config.address_match_floor = f;
        }
        if let Some(minutes) = parse::<u64, _>(&get, "MEDIA_STALENESS_MINUTES")? {
            config.staleness_window = Duration::from_secs(minutes * 60);
        }
        if let Some(n) = parse(&get, "MEDIA_MAX_IMAGES")? {
            config.max_images_per_property = n;
        }
        if let Some(n) = parse(&get, "MEDIA_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }
        if let Some(n) = parse(&get, "MEDIA_REQUESTS_PER_SECOND")? {
            config.rate_limit.per_second = n;
        }
        if let Some(n) = parse(&get, "MEDIA_REQUESTS_PER_MINUTE")? {
            config.rate_limit.per_minute = n;
        }
        if let Some(n) = parse(&get, "MEDIA_REQUESTS_PER_DAY")? {
            config.rate_limit.per_day = n;
        }
        config.site_profiles_path = get("MEDIA_SITE_PROFILES").map(PathBuf::from);
        config.properties_file = get("MEDIA_PROPERTIES_FILE").map(PathBuf::from);

        match (get("MEDIA_REMOTE_BROWSER_URL"), get("MEDIA_REMOTE_BROWSER_API_KEY")) {
            (Some(url), Some(key)) => {
                config.remote_browser = Some(RemoteBrowserCredentials::new(url, key));
            }
            (Some(_), None) => {
                return Err(ConfigError::Missing("MEDIA_REMOTE_BROWSER_API_KEY".into()));
            }
            _ => {}
        }

        if let Some(resume) = parse_flag(&get, "MEDIA_RESUME")? {
            config.resume = resume;
        }
        if let Some(force) = parse_flag(&get, "MEDIA_FORCE")? {
            config.force = force;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_properties == 0 {
            return Err(invalid("max_concurrent_properties", &self.max_concurrent_properties));
        }
        if !(DEFAULT_ADDRESS_MATCH_FLOOR..=1.0).contains(&self.address_match_floor) {
            return Err(invalid("address_match_floor", &self.address_match_floor));
        }
        if self.min_dimension > self.max_dimension {
            return Err(invalid("min_dimension", &self.min_dimension));
        }
        if self.worker_threads == Some(0) {
            return Err(invalid("worker_threads", &0));
        }
        Ok(())
    }

    /// Site profiles from `site_profiles_path`, or none when unset.
    pub fn site_profiles(&self) -> Result<Vec<SiteProfile>, ConfigError> {
        match &self.site_profiles_path {
            Some(path) => load_site_profiles(path),
            None => Ok(Vec::new()),
        }
    }
}

/// Read a JSON array of [`SiteProfile`]s.
pub fn load_site_profiles(path: &Path) -> Result<Vec<SiteProfile>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
        key: "MEDIA_SITE_PROFILES".into(),
        value: format!("{}: {e}", path.display()),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
        key: "MEDIA_SITE_PROFILES".into(),
        value: format!("{}: {e}", path.display()),
    })
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            })
        })
        .transpose()
}

fn parse_flag<G>(get: &G, key: &str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
        })
        .transpose()
}

fn invalid(key: &str, value: &dyn std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_properties, 3);
        assert_eq!(config.deduplication_threshold, 8);
        assert_eq!(config.max_dimension, 1024);
        assert_eq!(config.staleness_window, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("MEDIA_BASE_DIR", "/tmp/media"),
            ("MEDIA_SOURCES", "zillow, redfin,,"),
            ("MEDIA_MAX_CONCURRENT", "1"),
            ("MEDIA_STALENESS_MINUTES", "5"),
            ("MEDIA_FORCE", "yes"),
            ("MEDIA_REMOTE_BROWSER_URL", "https://render.example"),
            ("MEDIA_REMOTE_BROWSER_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.base_dir, PathBuf::from("/tmp/media"));
        assert_eq!(config.enabled_sources, vec!["zillow", "redfin"]);
        assert_eq!(config.max_concurrent_properties, 1);
        assert_eq!(config.staleness_window, Duration::from_secs(300));
        assert!(config.force);
        assert_eq!(
            config.remote_browser.unwrap().api_key.expose(),
            "sk-test"
        );
    }

    #[test]
    fn test_invalid_number_names_the_key() {
        let err = PipelineConfig::from_lookup(lookup(&[("MEDIA_MAX_DIMENSION", "big")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, value } => {
                assert_eq!(key, "MEDIA_MAX_DIMENSION");
                assert_eq!(value, "big");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_remote_url_without_key() {
        let err = PipelineConfig::from_lookup(lookup(&[(
            "MEDIA_REMOTE_BROWSER_URL",
            "https://render.example",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PipelineConfig::default().with_max_concurrent_properties(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_floor_below_default() {
        assert!(PipelineConfig::default()
            .with_address_match_floor(0.3)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_address_match_floor(0.75)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_load_site_profiles() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("sites.json");
        std::fs::write(
            &path,
            r#"[{"name": "zillow", "search_url_template": "https://www.zillow.com/homes/{address}_rb/"}]"#,
        )
        .unwrap();
        let profiles = PipelineConfig::default()
            .with_site_profiles_path(&path)
            .site_profiles()
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "zillow");
        assert!(profiles[0].prefer_listing_url);
    }
}
