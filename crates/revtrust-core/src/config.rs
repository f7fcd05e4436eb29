use std::str::FromStr;

use crate::app_config::{
    AlertSettings, AppConfig, ChunkSettings, Environment, JobApiSettings, LlmSettings,
    ReviewsApiSettings, ScraperSettings, SourceVariant,
};
use crate::ConfigError;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

fn parse_value<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("REVTRUST_ENV", "development"))?;
    let bind_addr: SocketAddr = parse_value(
        "REVTRUST_BIND_ADDR",
        &or_default("REVTRUST_BIND_ADDR", "0.0.0.0:3000"),
    )?;
    let log_level = or_default("REVTRUST_LOG_LEVEL", "info");
    let egress_path = PathBuf::from(or_default("REVTRUST_EGRESS_PATH", "./config/egress.yaml"));

    let db_max_connections: u32 = parse_value(
        "REVTRUST_DB_MAX_CONNECTIONS",
        &or_default("REVTRUST_DB_MAX_CONNECTIONS", "10"),
    )?;
    let db_min_connections: u32 = parse_value(
        "REVTRUST_DB_MIN_CONNECTIONS",
        &or_default("REVTRUST_DB_MIN_CONNECTIONS", "1"),
    )?;
    if db_min_connections > db_max_connections {
        return Err(ConfigError::InvalidEnvVar {
            var: "REVTRUST_DB_MIN_CONNECTIONS".to_string(),
            reason: format!(
                "min connections ({db_min_connections}) exceeds max connections ({db_max_connections})"
            ),
        });
    }
    let db_acquire_timeout_secs: u64 = parse_value(
        "REVTRUST_DB_ACQUIRE_TIMEOUT_SECS",
        &or_default("REVTRUST_DB_ACQUIRE_TIMEOUT_SECS", "10"),
    )?;

    let primary_source: SourceVariant = parse_value(
        "REVTRUST_PRIMARY_SOURCE",
        &or_default("REVTRUST_PRIMARY_SOURCE", "direct_html"),
    )?;
    let source_order = parse_source_order(primary_source, optional("REVTRUST_SOURCE_ORDER"))?;

    let page_delay_min_ms: u64 = parse_value(
        "REVTRUST_PAGE_DELAY_MIN_MS",
        &or_default("REVTRUST_PAGE_DELAY_MIN_MS", "400"),
    )?;
    let page_delay_max_ms: u64 = parse_value(
        "REVTRUST_PAGE_DELAY_MAX_MS",
        &or_default("REVTRUST_PAGE_DELAY_MAX_MS", "1200"),
    )?;
    if page_delay_min_ms > page_delay_max_ms {
        return Err(ConfigError::InvalidEnvVar {
            var: "REVTRUST_PAGE_DELAY_MIN_MS".to_string(),
            reason: format!("{page_delay_min_ms} exceeds REVTRUST_PAGE_DELAY_MAX_MS ({page_delay_max_ms})"),
        });
    }

    let scraper = ScraperSettings {
        marketplace_base_url: optional("REVTRUST_MARKETPLACE_BASE_URL"),
        request_timeout_secs: parse_value(
            "REVTRUST_REQUEST_TIMEOUT_SECS",
            &or_default("REVTRUST_REQUEST_TIMEOUT_SECS", "30"),
        )?,
        user_agent: or_default("REVTRUST_USER_AGENT", DEFAULT_USER_AGENT),
        max_retries: parse_value(
            "REVTRUST_MAX_RETRIES",
            &or_default("REVTRUST_MAX_RETRIES", "3"),
        )?,
        retry_backoff_base_ms: parse_value(
            "REVTRUST_RETRY_BACKOFF_BASE_MS",
            &or_default("REVTRUST_RETRY_BACKOFF_BASE_MS", "1000"),
        )?,
        page_delay_min_ms,
        page_delay_max_ms,
        max_pages: parse_value("REVTRUST_MAX_PAGES", &or_default("REVTRUST_MAX_PAGES", "10"))?,
        max_reviews: parse_value(
            "REVTRUST_MAX_REVIEWS",
            &or_default("REVTRUST_MAX_REVIEWS", "500"),
        )?,
        credential_cooldown_minutes: parse_value(
            "REVTRUST_CREDENTIAL_COOLDOWN_MINUTES",
            &or_default("REVTRUST_CREDENTIAL_COOLDOWN_MINUTES", "30"),
        )?,
    };

    let job_api = JobApiSettings {
        base_url: optional("REVTRUST_JOB_API_URL"),
        api_key: optional("REVTRUST_JOB_API_KEY"),
        poll_interval_secs: parse_value(
            "REVTRUST_JOB_POLL_INTERVAL_SECS",
            &or_default("REVTRUST_JOB_POLL_INTERVAL_SECS", "10"),
        )?,
        poll_max_attempts: parse_value(
            "REVTRUST_JOB_POLL_MAX_ATTEMPTS",
            &or_default("REVTRUST_JOB_POLL_MAX_ATTEMPTS", "30"),
        )?,
        async_mode: parse_bool("REVTRUST_ASYNC_MODE", &or_default("REVTRUST_ASYNC_MODE", "false"))?,
    };

    let reviews_api = ReviewsApiSettings {
        base_url: optional("REVTRUST_REVIEWS_API_URL"),
        api_key: optional("REVTRUST_REVIEWS_API_KEY"),
    };

    let llm = LlmSettings {
        api_url: or_default("REVTRUST_LLM_API_URL", "https://api.openai.com/v1"),
        api_key: optional("REVTRUST_LLM_API_KEY"),
        model: or_default("REVTRUST_LLM_MODEL", "gpt-4o-mini"),
        max_tokens: parse_value(
            "REVTRUST_LLM_MAX_TOKENS",
            &or_default("REVTRUST_LLM_MAX_TOKENS", "2000"),
        )?,
        timeout_secs: parse_value(
            "REVTRUST_LLM_TIMEOUT_SECS",
            &or_default("REVTRUST_LLM_TIMEOUT_SECS", "90"),
        )?,
    };

    let chunk_size: usize = parse_value(
        "REVTRUST_CHUNK_SIZE",
        &or_default("REVTRUST_CHUNK_SIZE", "25"),
    )?;
    if chunk_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "REVTRUST_CHUNK_SIZE".to_string(),
            reason: "chunk size must be at least 1".to_string(),
        });
    }
    let failure_ceiling: f64 = parse_value(
        "REVTRUST_CHUNK_FAILURE_CEILING",
        &or_default("REVTRUST_CHUNK_FAILURE_CEILING", "0.5"),
    )?;
    if !(0.0..=1.0).contains(&failure_ceiling) {
        return Err(ConfigError::InvalidEnvVar {
            var: "REVTRUST_CHUNK_FAILURE_CEILING".to_string(),
            reason: format!("{failure_ceiling} is outside 0.0..=1.0"),
        });
    }
    let chunking = ChunkSettings {
        chunk_size,
        concurrency: parse_value(
            "REVTRUST_CHUNK_CONCURRENCY",
            &or_default("REVTRUST_CHUNK_CONCURRENCY", "4"),
        )?,
        failure_ceiling,
        inter_chunk_delay_ms: parse_value(
            "REVTRUST_CHUNK_DELAY_MS",
            &or_default("REVTRUST_CHUNK_DELAY_MS", "0"),
        )?,
        chunk_timeout_secs: parse_value(
            "REVTRUST_CHUNK_TIMEOUT_SECS",
            &or_default("REVTRUST_CHUNK_TIMEOUT_SECS", "120"),
        )?,
    };

    let alerts = AlertSettings {
        webhook_url: optional("REVTRUST_ALERT_WEBHOOK_URL"),
    };

    let worker_concurrency: usize = parse_value(
        "REVTRUST_WORKER_CONCURRENCY",
        &or_default("REVTRUST_WORKER_CONCURRENCY", "2"),
    )?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        egress_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        primary_source,
        source_order,
        scraper,
        job_api,
        reviews_api,
        llm,
        chunking,
        alerts,
        worker_concurrency,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "production" => Ok(Environment::Production),
        "test" => Ok(Environment::Test),
        other => Err(ConfigError::InvalidEnvVar {
            var: "REVTRUST_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

/// Resolve the adapter fallback order.
///
/// Without an explicit list the primary variant comes first, followed by the
/// rest in [`SourceVariant::ALL`] order. An explicit list is honoured as
/// written except that the primary variant is always moved to the front.
fn parse_source_order(
    primary: SourceVariant,
    explicit: Option<String>,
) -> Result<Vec<SourceVariant>, ConfigError> {
    let mut order = vec![primary];

    match explicit {
        None => {
            order.extend(SourceVariant::ALL.iter().copied().filter(|v| *v != primary));
        }
        Some(raw) => {
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let variant: SourceVariant = parse_value("REVTRUST_SOURCE_ORDER", part)?;
                if !order.contains(&variant) {
                    order.push(variant);
                }
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
