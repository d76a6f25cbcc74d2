use serde::{Deserialize, Deserializer};

use crate::error::{AppError, AppResult};
use crate::services::RetryPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// IMDb list export, either an http(s) URL or a local CSV path
    #[serde(default)]
    pub imdb_watchlist_url: Option<String>,

    /// Plex account token
    #[serde(default)]
    pub plex_token: Option<String>,

    /// Also remove watchlist items that are not on the IMDb list
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub remove_mode: bool,

    /// Log planned operations without touching the Plex watchlist
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub dry_run: bool,

    /// Maximum number of in-flight lookups or mutations
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Retries after the first failed attempt of a mutation
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// IMDb ids per Wikidata SPARQL query
    #[serde(default = "default_lookup_batch_size")]
    pub lookup_batch_size: usize,

    /// Plex Discover API base URL
    #[serde(default = "default_plex_api_url")]
    pub plex_api_url: String,

    /// Wikidata SPARQL endpoint
    #[serde(default = "default_wikidata_sparql_url")]
    pub wikidata_sparql_url: String,

    /// Set by GitHub Actions when debug logging is requested
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub actions_runner_debug: bool,
}

/// Accepts the flag spellings CI runners use ("true", "1", "yes", "on")
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean value '{}'",
            other
        ))),
    }
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_lookup_batch_size() -> usize {
    250
}

fn default_plex_api_url() -> String {
    "https://discover.provider.plex.tv".to_string()
}

fn default_wikidata_sparql_url() -> String {
    "https://query.wikidata.org/sparql".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imdb_watchlist_url: None,
            plex_token: None,
            remove_mode: false,
            dry_run: false,
            concurrency_limit: default_concurrency_limit(),
            retry_limit: default_retry_limit(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            lookup_batch_size: default_lookup_batch_size(),
            plex_api_url: default_plex_api_url(),
            wikidata_sparql_url: default_wikidata_sparql_url(),
            actions_runner_debug: false,
        }
    }
}

/// The subset of configuration the reconciliation engine receives
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub remove_mode: bool,
    pub dry_run: bool,
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine_config()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Checks that the required settings are present
    pub fn validate(&self) -> AppResult<()> {
        if self.source_location()?.is_empty() {
            return Err(AppError::Config(
                "IMDB_WATCHLIST_URL must not be empty".to_string(),
            ));
        }
        if self.token()?.is_empty() {
            return Err(AppError::Config("PLEX_TOKEN must not be empty".to_string()));
        }
        if self.lookup_batch_size == 0 {
            return Err(AppError::Config(
                "LOOKUP_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source_location(&self) -> AppResult<&str> {
        self.imdb_watchlist_url
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| AppError::Config("IMDB_WATCHLIST_URL is not set".to_string()))
    }

    pub fn token(&self) -> AppResult<&str> {
        self.plex_token
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| AppError::Config("PLEX_TOKEN is not set".to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            remove_mode: self.remove_mode,
            dry_run: self.dry_run,
            concurrency_limit: self.concurrency_limit.max(1),
            retry: RetryPolicy::new(self.retry_limit)
                .with_initial_backoff(self.retry_base_delay_ms)
                .with_max_backoff(self.retry_max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(source: Option<&str>, token: Option<&str>) -> Config {
        Config {
            imdb_watchlist_url: source.map(str::to_string),
            plex_token: token.map(str::to_string),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_are_additive_only() {
        let config = Config::default();
        assert!(!config.remove_mode);
        assert!(!config.dry_run);
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.plex_api_url, "https://discover.provider.plex.tv");
    }

    #[test]
    fn test_validate_requires_source_and_token() {
        let missing_source = config_with(None, Some("token"));
        assert!(matches!(missing_source.validate(), Err(AppError::Config(_))));

        let blank_token = config_with(Some("https://example.com/list.csv"), Some("  "));
        assert!(matches!(blank_token.validate(), Err(AppError::Config(_))));

        let ok = config_with(Some("https://example.com/list.csv"), Some("token"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_engine_config_clamps_concurrency() {
        let config = Config {
            concurrency_limit: 0,
            retry_limit: 5,
            ..Config::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.concurrency_limit, 1);
        assert_eq!(engine.retry.max_retries, 5);
    }

    #[test]
    fn test_deserialize_from_env_pairs() {
        let vars = vec![
            ("IMDB_WATCHLIST_URL".to_string(), "list.csv".to_string()),
            ("PLEX_TOKEN".to_string(), "abc".to_string()),
            ("REMOVE_MODE".to_string(), "true".to_string()),
            ("CONCURRENCY_LIMIT".to_string(), "8".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.source_location().unwrap(), "list.csv");
        assert!(config.remove_mode);
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.retry_limit, 3);
    }

    #[test]
    fn test_numeric_flags_are_accepted() {
        let vars = vec![
            ("ACTIONS_RUNNER_DEBUG".to_string(), "1".to_string()),
            ("DRY_RUN".to_string(), "0".to_string()),
            ("REMOVE_MODE".to_string(), "Yes".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert!(config.actions_runner_debug);
        assert!(!config.dry_run);
        assert!(config.remove_mode);
    }

    #[test]
    fn test_unknown_flag_value_is_rejected() {
        let vars = vec![("DRY_RUN".to_string(), "maybe".to_string())];
        assert!(envy::from_iter::<_, Config>(vars).is_err());
    }
}
