use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::repository::RetryPolicy;

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded and
/// pulled into handlers and extractors via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and which settings are mandatory.
    pub env: Env,
    // Postgres connection string. `None` runs the in-memory store (local only).
    pub db_url: Option<String>,
    // HS256 secret used to verify (and, in tests, issue) bearer credentials.
    pub jwt_secret: String,
    pub bind_addr: String,
    // Per-attempt bound on every store call.
    pub store_timeout: Duration,
    // Extra attempts granted to connectivity failures.
    pub store_retry_budget: u32,
    // Base delay of the exponential backoff between attempts.
    pub store_retry_backoff: Duration,
    pub completion_policy: CompletionPolicy,
}

/// Env
///
/// Defines the runtime context: pretty logs and relaxed defaults locally, JSON
/// logs and mandatory secrets in production.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// CompletionPolicy
///
/// What happens to a completed enrollment when the learner un-marks an item and
/// the recomputed percentage drops below 100.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CompletionPolicy {
    /// Completion is one-way.
    #[default]
    ForwardOnly,
    /// `completed` goes back to `active`.
    RevertOnRegress,
}

impl FromStr for CompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward_only" => Ok(CompletionPolicy::ForwardOnly),
            "revert_on_regress" => Ok(CompletionPolicy::RevertOnRegress),
            other => Err(format!("unknown completion policy '{other}'")),
        }
    }
}

impl Default for AppConfig {
    /// default
    ///
    /// A safe, non-panicking configuration for tests: in-memory store, a fixed
    /// local secret and the default retry policy.
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            env: Env::Local,
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            store_timeout: retry.timeout,
            store_retry_budget: retry.retries,
            store_retry_backoff: retry.backoff,
            completion_policy: CompletionPolicy::ForwardOnly,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, fallback: T) -> T {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("FATAL: {name} has an invalid value '{raw}'")),
        Err(_) => fallback,
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every setting from the environment and fails fast.
    ///
    /// # Panics
    /// Panics if a setting is malformed, or if `JWT_SECRET` / `DATABASE_URL`
    /// is missing in production. The process must not start half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let (jwt_secret, db_url) = match env {
            Env::Production => (
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production."),
                Some(env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod")),
            ),
            Env::Local => (
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
                env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            ),
        };

        let defaults = RetryPolicy::default();
        let completion_policy = match env::var("COMPLETION_POLICY") {
            Ok(raw) => raw
                .parse()
                .unwrap_or_else(|e: String| panic!("FATAL: COMPLETION_POLICY: {e}")),
            Err(_) => CompletionPolicy::default(),
        };

        Self {
            env,
            db_url,
            jwt_secret,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            store_timeout: Duration::from_millis(parse_var(
                "STORE_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )),
            store_retry_budget: parse_var("STORE_RETRY_BUDGET", defaults.retries),
            store_retry_backoff: Duration::from_millis(parse_var(
                "STORE_RETRY_BACKOFF_MS",
                defaults.backoff.as_millis() as u64,
            )),
            completion_policy,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.store_timeout,
            retries: self.store_retry_budget,
            backoff: self.store_retry_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_policy_parses_both_spellings() {
        assert_eq!(
            "forward_only".parse::<CompletionPolicy>(),
            Ok(CompletionPolicy::ForwardOnly)
        );
        assert_eq!(
            " Revert_On_Regress ".parse::<CompletionPolicy>(),
            Ok(CompletionPolicy::RevertOnRegress)
        );
        assert!("sometimes".parse::<CompletionPolicy>().is_err());
    }

    #[test]
    fn default_config_matches_the_default_retry_policy() {
        assert_eq!(AppConfig::default().retry_policy(), RetryPolicy::default());
    }
}
