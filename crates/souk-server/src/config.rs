use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SOUK_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub media_dir: PathBuf,
    pub media_url: String,
    pub token_ttl_days: i64,
    pub referral_cache_secs: i64,
    pub sweep_interval_secs: u64,
    pub ad_retention_days: i64,
    /// Accounts promoted to moderator at startup.
    pub moderator_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = get("SOUK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let host = get("SOUK_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("SOUK_PORT").unwrap_or_else(|| "3000".into());
        let addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "SOUK_HOST/SOUK_PORT", value: format!("{}:{}", host, port) })?;

        let moderator_emails = get("SOUK_MODERATOR_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            jwt_secret,
            db_path: get("SOUK_DB_PATH").unwrap_or_else(|| "souk.db".into()).into(),
            addr,
            media_dir: get("SOUK_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            media_url: get("SOUK_PUBLIC_MEDIA_URL").unwrap_or_else(|| "/media".into()),
            token_ttl_days: number(&get, "SOUK_TOKEN_TTL_DAYS", 30)?,
            referral_cache_secs: number(&get, "SOUK_REFERRAL_CACHE_SECS", 300)?,
            sweep_interval_secs: number(&get, "SOUK_SWEEP_INTERVAL_SECS", 3600)?,
            ad_retention_days: number(&get, "SOUK_AD_RETENTION_DAYS", 60)?,
            moderator_emails,
        })
    }
}

/// A positive integer setting, or `default` when unset.
fn number<T>(get: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let cfg = config(&[("SOUK_JWT_SECRET", "s3cret-value")]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.db_path, PathBuf::from("souk.db"));
        assert_eq!(cfg.media_url, "/media");
        assert_eq!(cfg.token_ttl_days, 30);
        assert_eq!(cfg.referral_cache_secs, 300);
        assert!(cfg.moderator_emails.is_empty());
    }

    #[test]
    fn placeholder_secrets_are_refused() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingSecret)));
        assert!(matches!(
            config(&[("SOUK_JWT_SECRET", "dev-secret-change-me")]),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config(&[("SOUK_JWT_SECRET", "x"), ("SOUK_TOKEN_TTL_DAYS", "0")]).unwrap_err();
        assert_eq!(err.to_string(), "SOUK_TOKEN_TTL_DAYS has an invalid value '0'");
    }

    #[test]
    fn moderator_list_is_comma_separated() {
        let cfg = config(&[
            ("SOUK_JWT_SECRET", "x"),
            ("SOUK_MODERATOR_EMAILS", " ops@souk.cm, ,admin@souk.cm "),
        ])
        .unwrap();
        assert_eq!(cfg.moderator_emails, ["ops@souk.cm", "admin@souk.cm"]);
    }
}
