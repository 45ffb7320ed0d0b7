//! Pipeline configuration
//!
//! Values come from the process environment (after loading `.env`), falling
//! back to defaults that run fully in-process.

use crate::error::PipelineError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const DEFAULT_API_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on drafting/execution attempts per question.
    pub max_retries: u32,
    /// Temperature for the contextual redaction call. 0 = minimal randomness.
    pub redaction_temperature: f32,
    /// Temperature for SQL drafting.
    pub sql_temperature: f32,
    /// Opaque model identifier handed to the generation port.
    pub generation_model_identifier: String,
    /// Artificial delay on each handoff crossing; `None` disables it.
    pub handoff_latency: Option<Duration>,
    pub database_url: String,
    pub gemini_api_key: String,
    pub api_port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            redaction_temperature: 0.0,
            sql_temperature: 0.0,
            generation_model_identifier: DEFAULT_MODEL.to_string(),
            handoff_latency: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            gemini_api_key: String::new(),
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_retries = parse_var(&lookup, "QUERY_GUARD_MAX_RETRIES")?
            .unwrap_or(defaults.max_retries);
        let redaction_temperature = parse_var(&lookup, "QUERY_GUARD_REDACTION_TEMPERATURE")?
            .unwrap_or(defaults.redaction_temperature);
        let sql_temperature = parse_var(&lookup, "QUERY_GUARD_SQL_TEMPERATURE")?
            .unwrap_or(defaults.sql_temperature);
        let latency_ms: u64 = parse_var(&lookup, "QUERY_GUARD_HANDOFF_LATENCY_MS")?.unwrap_or(0);
        let api_port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                PipelineError::Config(format!("PORT must be a port number, got {:?}", raw))
            })?,
            None => defaults.api_port,
        };

        let config = Self {
            max_retries,
            redaction_temperature,
            sql_temperature,
            generation_model_identifier: non_empty(lookup("QUERY_GUARD_MODEL"))
                .unwrap_or(defaults.generation_model_identifier),
            handoff_latency: (latency_ms > 0).then(|| Duration::from_millis(latency_ms)),
            database_url: non_empty(lookup("DATABASE_URL")).unwrap_or(defaults.database_url),
            gemini_api_key: lookup("GEMINI_API_KEY").unwrap_or_default(),
            api_port,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(PipelineError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("redaction_temperature", self.redaction_temperature),
            ("sql_temperature", self.sql_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{} must lie in 0.0..=2.0, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup(key)) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("{} has invalid value {:?}", key, raw))),
        None => Ok(None),
    }
}
