use crate::error::RunError;
use crate::models::{
    ApiKey, MAX_RECOMMENDED_BUDGET, MIN_RECOMMENDED_BUDGET, RunOptions,
};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Service-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub api_url: String,
    pub model: String,
    pub default_api_key: Option<ApiKey>,
    pub output_dir: PathBuf,
    /// How long a finished job and its output file are kept.
    pub job_retention: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Settings {
            bind_addr: non_empty("BOOKFIX_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            api_url: non_empty("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: non_empty("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_api_key: non_empty("LLM_API_KEY").map(|k| ApiKey::new(k.trim())),
            output_dir: non_empty("BOOKFIX_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./output")),
            job_retention: non_empty("BOOKFIX_JOB_RETENTION_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_JOB_RETENTION),
        }
    }
}

/// Checks run before any paragraph is read or any request is sent.
pub fn validate<'a>(options: &RunOptions, key: Option<&'a ApiKey>) -> Result<&'a ApiKey, RunError> {
    let key = key.ok_or_else(|| RunError::Config("no API key was provided".into()))?;
    if key.expose().trim().is_empty() {
        return Err(RunError::Config("the API key is empty".into()));
    }
    if key.expose().chars().any(char::is_whitespace) {
        return Err(RunError::Config("the API key contains whitespace".into()));
    }

    if options.token_budget == 0 {
        return Err(RunError::Config(
            "token budget must be a positive integer".into(),
        ));
    }
    if !(MIN_RECOMMENDED_BUDGET..=MAX_RECOMMENDED_BUDGET).contains(&options.token_budget) {
        tracing::warn!(
            budget = options.token_budget,
            "token budget is outside the usual {}..={} range",
            MIN_RECOMMENDED_BUDGET,
            MAX_RECOMMENDED_BUDGET
        );
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.model, "gpt-4o-mini");
        assert!(settings.default_api_key.is_none());
        assert_eq!(settings.output_dir, PathBuf::from("./output"));
        assert_eq!(settings.job_retention, DEFAULT_JOB_RETENTION);
    }

    #[test]
    fn env_values_override_defaults() {
        let env: HashMap<&str, &str> = [
            ("LLM_API_URL", "http://127.0.0.1:9000/v1/chat/completions"),
            ("LLM_MODEL", "gpt-4o"),
            ("LLM_API_KEY", " sk-test "),
            ("BOOKFIX_OUTPUT_DIR", "/tmp/out"),
            ("BOOKFIX_BIND", "   "),
            ("BOOKFIX_JOB_RETENTION_SECS", "120"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.api_url, "http://127.0.0.1:9000/v1/chat/completions");
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.default_api_key, Some(ApiKey::new("sk-test")));
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.bind_addr, "0.0.0.0:3000");
        assert_eq!(settings.job_retention, Duration::from_secs(120));
    }

    #[test]
    fn missing_or_malformed_key_is_a_config_error() {
        let options = RunOptions::default();
        assert!(matches!(validate(&options, None), Err(RunError::Config(_))));
        assert!(matches!(
            validate(&options, Some(&ApiKey::new("  "))),
            Err(RunError::Config(_))
        ));
        assert!(matches!(
            validate(&options, Some(&ApiKey::new("sk-a b"))),
            Err(RunError::Config(_))
        ));
        assert!(validate(&options, Some(&ApiKey::new("sk-ok"))).is_ok());
    }

    #[test]
    fn zero_budget_is_rejected_but_unusual_budgets_pass() {
        let key = ApiKey::new("sk-ok");
        let zero = RunOptions {
            token_budget: 0,
            ..RunOptions::default()
        };
        assert!(matches!(validate(&zero, Some(&key)), Err(RunError::Config(_))));

        let tiny = RunOptions {
            token_budget: 10,
            ..RunOptions::default()
        };
        assert!(validate(&tiny, Some(&key)).is_ok());
    }
}
