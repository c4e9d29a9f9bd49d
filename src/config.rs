//! Process configuration, read once at startup and passed by reference.

use crate::query::ModelProvider;
use crate::IngestOptions;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TABLE: &str = "claims";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the managed database's REST endpoint.
    pub db_url: Option<String>,
    /// Public (row-level-security) key, used for inserts and counts.
    pub db_key: Option<String>,
    /// Privileged key; preferred for raw SQL execution when present.
    pub db_service_key: Option<String>,
    pub table: String,
    pub batch_capacity: usize,
    pub request_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: None,
            db_key: None,
            db_service_key: None,
            table: DEFAULT_TABLE.to_string(),
            batch_capacity: crate::DEFAULT_BATCH_CAPACITY,
            request_timeout: DEFAULT_TIMEOUT,
            openai_api_key: None,
            gemini_api_key: None,
            groq_api_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config {
            db_url: get("CLAIMS_DB_URL").map(|u| u.trim_end_matches('/').to_string()),
            db_key: get("CLAIMS_DB_KEY"),
            db_service_key: get("CLAIMS_DB_SERVICE_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY"),
            groq_api_key: get("GROQ_API_KEY"),
            ..Default::default()
        };
        if let Some(table) = get("CLAIMS_TABLE") {
            config.table = table;
        }
        if let Some(raw) = get("CLAIMS_BATCH_SIZE") {
            config.batch_capacity = match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "CLAIMS_BATCH_SIZE",
                        value: raw,
                    })
                }
            };
        }
        if let Some(raw) = get("CLAIMS_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "CLAIMS_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if config.db_url.is_none() || config.db_key.is_none() {
            log::warn!("Database URL or key is missing; database commands will fail");
        }
        for (provider, key) in [
            (ModelProvider::OpenAi, &config.openai_api_key),
            (ModelProvider::Gemini, &config.gemini_api_key),
            (ModelProvider::Groq, &config.groq_api_key),
        ] {
            if key.is_none() {
                log::debug!("{provider} API key is missing");
            }
        }
        Ok(config)
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch_capacity: self.batch_capacity,
            ..Default::default()
        }
    }

    pub fn db_url(&self) -> Result<&str, ConfigError> {
        self.db_url.as_deref().ok_or(ConfigError::Missing("CLAIMS_DB_URL"))
    }

    pub fn db_key(&self) -> Result<&str, ConfigError> {
        self.db_key.as_deref().ok_or(ConfigError::Missing("CLAIMS_DB_KEY"))
    }

    /// Key for raw SQL execution: the service key when set, else the public key.
    pub fn sql_key(&self) -> Result<&str, ConfigError> {
        match self.db_service_key.as_deref() {
            Some(key) => Ok(key),
            None => self.db_key(),
        }
    }

    pub fn service_key(&self) -> Result<&str, ConfigError> {
        self.db_service_key
            .as_deref()
            .ok_or(ConfigError::Missing("CLAIMS_DB_SERVICE_KEY"))
    }

    pub fn model_key(&self, provider: ModelProvider) -> Result<&str, ConfigError> {
        let (key, name) = match provider {
            ModelProvider::OpenAi => (&self.openai_api_key, "OPENAI_API_KEY"),
            ModelProvider::Gemini => (&self.gemini_api_key, "GEMINI_API_KEY"),
            ModelProvider::Groq => (&self.groq_api_key, "GROQ_API_KEY"),
        };
        key.as_deref().ok_or(ConfigError::Missing(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.batch_capacity, 500);
        assert_eq!(config.request_timeout, Duration::from_secs(600));
        assert_eq!(config.table, "claims");
        assert!(matches!(config.db_url(), Err(ConfigError::Missing("CLAIMS_DB_URL"))));
    }

    #[test]
    fn reads_overrides_and_prefers_service_key_for_sql() {
        let config = from_pairs(&[
            ("CLAIMS_DB_URL", "https://db.example.com/"),
            ("CLAIMS_DB_KEY", "anon"),
            ("CLAIMS_DB_SERVICE_KEY", "service"),
            ("CLAIMS_BATCH_SIZE", "250"),
            ("CLAIMS_TIMEOUT_SECS", "30"),
            ("GROQ_API_KEY", "gk"),
        ])
        .unwrap();
        assert_eq!(config.db_url().unwrap(), "https://db.example.com");
        assert_eq!(config.sql_key().unwrap(), "service");
        assert_eq!(config.ingest_options().batch_capacity, 250);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.model_key(ModelProvider::Groq).unwrap(), "gk");
        assert!(config.model_key(ModelProvider::OpenAi).is_err());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(matches!(
            from_pairs(&[("CLAIMS_BATCH_SIZE", "0")]),
            Err(ConfigError::Invalid { name: "CLAIMS_BATCH_SIZE", .. })
        ));
        assert!(matches!(
            from_pairs(&[("CLAIMS_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::Invalid { name: "CLAIMS_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = from_pairs(&[("CLAIMS_DB_KEY", "  ")]).unwrap();
        assert!(config.db_key.is_none());
    }
}
