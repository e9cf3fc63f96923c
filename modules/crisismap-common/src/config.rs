use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database (in-memory store when unset)
    pub database_url: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Auth
    pub session_secret: String,
    pub admin_uids: Vec<String>,

    // JSON proxy
    pub jsonp_max_qpm: usize,
    pub jsonp_cache_seconds: u64,
    pub fetch_timeout_secs: u64,
    pub jsonp_max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_env("API_PORT", 8000)?,
            session_secret: std::env::var("SESSION_SECRET")
                .context("SESSION_SECRET environment variable is required")?,
            admin_uids: split_list(&std::env::var("ADMIN_UIDS").unwrap_or_default()),
            jsonp_max_qpm: parse_env("JSONP_MAX_QPM", 30)?,
            jsonp_cache_seconds: parse_env("JSONP_CACHE_SECONDS", 120)?,
            fetch_timeout_secs: parse_env("FETCH_TIMEOUT_SECS", 20)?,
            jsonp_max_body_bytes: parse_env("JSONP_MAX_BODY_BYTES", 5 * 1024 * 1024)?,
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{}...({} chars)", head, val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
        tracing::info!("  SESSION_SECRET: {}", preview(&self.session_secret));
        tracing::info!("  ADMIN_UIDS: {} configured", self.admin_uids.len());
        tracing::info!(
            "  JSONP: {} fetches/min, {}s cache, {}s timeout, {} byte bodies",
            self.jsonp_max_qpm,
            self.jsonp_cache_seconds,
            self.fetch_timeout_secs,
            self.jsonp_max_body_bytes
        );
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        _ => Ok(default),
    }
}

/// Splits a comma-separated env value, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
        assert!(split_list("").is_empty());
    }
}
