use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::store::DB_PATH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
    pub static_dir: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub reminder_interval: Duration,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub admin: Option<AdminSeed>,
}

impl Config {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // empty values count as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let admin = match (get("ADMIN_EMAIL"), get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                name: get("ADMIN_NAME").unwrap_or_else(|| "Admin".to_string()),
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", "127.0.0.1:3000")?,
            data_path: PathBuf::from(get("DATA_PATH").unwrap_or_else(|| DB_PATH.to_string())),
            static_dir: PathBuf::from(get("STATIC_DIR").unwrap_or_else(|| "static".to_string())),
            jwt_secret,
            token_ttl_hours: parse_or(&get, "TOKEN_TTL_HOURS", "24")?,
            reminder_interval: Duration::from_secs(parse_or(&get, "REMINDER_INTERVAL_SECS", "60")?),
            mail_relay_url: get("MAIL_RELAY_URL"),
            mail_from: get("MAIL_FROM").unwrap_or_else(|| "no-reply@timetrack.local".to_string()),
            admin,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError> {
    let raw = get(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(c.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(c.data_path, PathBuf::from("data/db.json"));
        assert_eq!(c.token_ttl_hours, 24);
        assert_eq!(c.reminder_interval, Duration::from_secs(60));
        assert!(c.mail_relay_url.is_none());
        assert!(c.admin.is_none());
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(
            config(&[("JWT_SECRET", "  ")]).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = config(&[("JWT_SECRET", "x"), ("REMINDER_INTERVAL_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "REMINDER_INTERVAL_SECS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn admin_seed_needs_email_and_password() {
        let c = config(&[("JWT_SECRET", "x"), ("ADMIN_EMAIL", "admin@example.com")]).unwrap();
        assert!(c.admin.is_none());

        let c = config(&[
            ("JWT_SECRET", "x"),
            ("ADMIN_EMAIL", "admin@example.com"),
            ("ADMIN_PASSWORD", "Admin@123"),
        ])
        .unwrap();
        let admin = c.admin.unwrap();
        assert_eq!(admin.name, "Admin");
        assert_eq!(admin.email, "admin@example.com");
    }
}
