//! # cb-config
//!
//! Runtime settings, read from the process environment (and an optional
//! `.env` file) once at startup.

use std::path::PathBuf;

use cb_core::validation::ValidationPolicy;
use config::{Config, Environment};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

/// Copies `.env` (if present) into the process environment without
/// overriding variables that are already set. Runs before logging is up,
/// so the outcome is returned for the caller to report.
pub fn load_dotenv() -> Result<PathBuf, dotenvy::Error> {
    dotenvy::dotenv()
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub port: u16,
    pub bind_address: String,
    /// Absolute origin used in emailed manage links. When unset, the
    /// request's `Host` header is used instead.
    pub base_url: Option<String>,
    pub database_path: PathBuf,
    pub legacy_posts_path: PathBuf,
    /// Static front-end files served for any unmatched route.
    pub public_dir: Option<PathBuf>,

    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<SecretString>,
    pub smtp_secure: bool,
    pub relay_from_email: Option<String>,

    pub owner_delete_key: Option<SecretString>,
    pub validation_policy: ValidationPolicy,
}

impl Settings {
    /// Reads the process environment. Call [`load_dotenv`] first for
    /// `.env` values to be seen.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Self::from_env(Environment::default())?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    /// Reads settings from `env`. Keys are the lowercased variable names,
    /// so `SMTP_HOST` fills `smtp_host`. Values stay strings until their
    /// field's type asks for a number or a bool, so `007` keeps its zeros.
    pub fn from_env(env: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("port", 3000)?
            .set_default("bind_address", "0.0.0.0")?
            .set_default("database_path", "data/chavrus.db")?
            .set_default("legacy_posts_path", "data/posts.json")?
            .set_default("smtp_port", 587)?
            .set_default("smtp_secure", false)?
            .set_default("validation_policy", "strict")?
            .add_source(env)
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    /// `BASE_URL` without a trailing slash, ignoring a blank value.
    pub fn base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Map;
    use secrecy::ExposeSecret;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let source: Map<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_env(Environment::default().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.port, 3000);
        assert_eq!(s.listen_addr(), "0.0.0.0:3000");
        assert_eq!(s.database_path, PathBuf::from("data/chavrus.db"));
        assert_eq!(s.legacy_posts_path, PathBuf::from("data/posts.json"));
        assert_eq!(s.smtp_port, 587);
        assert!(!s.smtp_secure);
        assert!(s.base_url().is_none());
        assert!(s.owner_delete_key.is_none());
        assert_eq!(s.validation_policy, ValidationPolicy::Strict);
    }

    #[test]
    fn test_reads_environment() {
        let s = settings(&[
            ("PORT", "8080"),
            ("BASE_URL", "https://chavrusa.test/"),
            ("SMTP_HOST", "smtp.mail.test"),
            ("SMTP_PORT", "465"),
            ("SMTP_SECURE", "true"),
            ("SMTP_PASS", "hunter2"),
            ("OWNER_DELETE_KEY", "sesame"),
            ("VALIDATION_POLICY", "lenient"),
        ])
        .unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.base_url().as_deref(), Some("https://chavrusa.test"));
        assert_eq!(s.smtp_host.as_deref(), Some("smtp.mail.test"));
        assert_eq!(s.smtp_port, 465);
        assert!(s.smtp_secure);
        assert_eq!(s.smtp_pass.as_ref().map(|p| p.expose_secret()), Some("hunter2"));
        assert_eq!(s.owner_delete_key.as_ref().map(|k| k.expose_secret()), Some("sesame"));
        assert_eq!(s.validation_policy, ValidationPolicy::Lenient);
    }

    #[test]
    fn test_numeric_looking_strings_are_kept_verbatim() {
        let s = settings(&[
            ("OWNER_DELETE_KEY", "007"),
            ("SMTP_PASS", "0123456"),
            ("SMTP_USER", "00042"),
            ("RELAY_FROM_EMAIL", "1e3"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(s.owner_delete_key.as_ref().map(|k| k.expose_secret()), Some("007"));
        assert_eq!(s.smtp_pass.as_ref().map(|p| p.expose_secret()), Some("0123456"));
        assert_eq!(s.smtp_user.as_deref(), Some("00042"));
        assert_eq!(s.relay_from_email.as_deref(), Some("1e3"));
        assert_eq!(s.port, 8080);
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let s = settings(&[("OWNER_DELETE_KEY", "sesame")]).unwrap();
        assert!(!format!("{s:?}").contains("sesame"));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(settings(&[("PORT", "not-a-port")]).is_err());
    }
}
