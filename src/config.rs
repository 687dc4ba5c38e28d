//! Backend connection settings.
//!
//! Settings live in the `local_settings` table under the `backend` category
//! and can be overridden per process through environment variables:
//!
//! | setting              | env override                 |
//! |----------------------|------------------------------|
//! | `deployed_url`       | `BACKOFFICE_DEPLOYED_URL`    |
//! | `local_origins`      | `BACKOFFICE_LOCAL_ORIGINS`   |
//! | `hostname`           | `BACKOFFICE_HOSTNAME`        |
//! | `production_domains` | `BACKOFFICE_PRODUCTION_DOMAINS` |
//! | `session_store`      | `BACKOFFICE_SESSION_STORE`   |

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::api::{normalize_origin_url, Environment, Origin, OriginKind};
use crate::db::{self, DbState};
use crate::storage::SessionBackend;

const CATEGORY: &str = "backend";

pub const DEFAULT_DEPLOYED_URL: &str = "https://backoffice-api.thesmall.app";
pub const DEFAULT_LOCAL_ORIGINS: &[&str] = &[
    "http://192.168.1.100:8000",
    "http://192.168.0.100:8000",
    "http://localhost:8000",
];
pub const DEFAULT_PRODUCTION_DOMAINS: &[&str] = &["thesmall.app", "backoffice.thesmall.app"];

/// Short timeout for LAN/localhost origins.
pub const LOCAL_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for the deployed origin.
pub const DEPLOYED_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the deployed origin on slow analytic endpoints.
pub const SLOW_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(50);

#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub deployed_url: String,
    pub local_origins: Vec<String>,
    pub production_domains: Vec<String>,
    /// Host this client presents itself as; drives environment detection.
    pub hostname: String,
    #[serde(serialize_with = "serialize_secs")]
    pub local_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub deployed_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub slow_timeout: Duration,
    #[serde(skip)]
    pub session_backend: SessionBackend,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            deployed_url: DEFAULT_DEPLOYED_URL.to_string(),
            local_origins: DEFAULT_LOCAL_ORIGINS.iter().map(|s| s.to_string()).collect(),
            production_domains: DEFAULT_PRODUCTION_DOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hostname: "localhost".to_string(),
            local_timeout: LOCAL_TIMEOUT,
            deployed_timeout: DEPLOYED_TIMEOUT,
            slow_timeout: SLOW_ENDPOINT_TIMEOUT,
            session_backend: SessionBackend::Keyring,
        }
    }
}

impl BackendConfig {
    /// Defaults, then stored settings, then environment overrides.
    pub fn load(db: &DbState) -> Self {
        let mut config = Self::default();
        match db.conn.lock() {
            Ok(conn) => {
                for (key, value) in db::get_category_settings(&conn, CATEGORY) {
                    config.apply(&key, &value);
                }
            }
            Err(e) => warn!(error = %e, "config: connection lock poisoned, using defaults"),
        }
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        for (key, var) in [
            ("deployed_url", "BACKOFFICE_DEPLOYED_URL"),
            ("local_origins", "BACKOFFICE_LOCAL_ORIGINS"),
            ("hostname", "BACKOFFICE_HOSTNAME"),
            ("production_domains", "BACKOFFICE_PRODUCTION_DOMAINS"),
            ("session_store", "BACKOFFICE_SESSION_STORE"),
        ] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    self.apply(key, &value);
                }
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "deployed_url" => {
                let url = normalize_origin_url(value);
                if !url.is_empty() {
                    self.deployed_url = url;
                }
            }
            "local_origins" => self.local_origins = parse_list(value),
            "production_domains" => {
                self.production_domains = parse_list(value)
                    .into_iter()
                    .map(|d| d.to_ascii_lowercase())
                    .collect();
            }
            "hostname" => self.hostname = value.trim().to_ascii_lowercase(),
            "local_timeout_secs" => set_secs(&mut self.local_timeout, key, value),
            "deployed_timeout_secs" => set_secs(&mut self.deployed_timeout, key, value),
            "slow_timeout_secs" => set_secs(&mut self.slow_timeout, key, value),
            "session_store" => match SessionBackend::parse(value) {
                Some(backend) => self.session_backend = backend,
                None => warn!(value, "config: unknown session store, keeping default"),
            },
            other => warn!(key = other, "config: ignoring unknown backend setting"),
        }
    }

    pub fn environment(&self) -> Environment {
        Environment::detect(&self.hostname, &self.production_domains)
    }

    /// Candidate origins in priority order: locals first, deployed last.
    pub fn origins(&self) -> Vec<Origin> {
        let mut origins: Vec<Origin> = Vec::new();
        for raw in &self.local_origins {
            let base_url = normalize_origin_url(raw);
            if base_url.is_empty() || origins.iter().any(|o| o.base_url == base_url) {
                continue;
            }
            origins.push(Origin {
                base_url,
                kind: OriginKind::Local,
            });
        }
        let deployed = normalize_origin_url(&self.deployed_url);
        origins.retain(|o| o.base_url != deployed);
        origins.push(Origin {
            base_url: deployed,
            kind: OriginKind::Deployed,
        });
        origins
    }
}

fn set_secs(target: &mut Duration, key: &str, value: &str) {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => *target = Duration::from_secs(secs),
        _ => warn!(key, value, "config: invalid timeout, keeping default"),
    }
}

/// Accepts a JSON array or a comma-separated list.
fn parse_list(raw: &str) -> Vec<String> {
    let items = serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_else(|_| raw.split(',').map(|s| s.to_string()).collect());
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Persist one backend setting after validating it.
pub fn set_backend_setting(db: &DbState, key: &str, value: &str) -> Result<(), String> {
    let stored = match key {
        "deployed_url" => {
            let url = normalize_origin_url(value);
            if url.is_empty() {
                return Err("Deployed URL cannot be empty".into());
            }
            url
        }
        "local_origins" | "production_domains" => {
            serde_json::to_string(&parse_list(value)).map_err(|e| e.to_string())?
        }
        "hostname" => {
            let host = value.trim().to_ascii_lowercase();
            if host.is_empty() {
                return Err("Hostname cannot be empty".into());
            }
            host
        }
        "local_timeout_secs" | "deployed_timeout_secs" | "slow_timeout_secs" => {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs.to_string(),
                _ => return Err(format!("{key} must be a positive number of seconds")),
            }
        }
        "session_store" => {
            SessionBackend::parse(value).ok_or("session_store must be 'keyring' or 'database'")?;
            value.trim().to_ascii_lowercase()
        }
        other => return Err(format!("Unknown backend setting: {other}")),
    };
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, CATEGORY, key, &stored)
}

/// Remove every stored backend setting, returning to defaults.
pub fn reset_backend_settings(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::delete_all_settings(&conn, CATEGORY)
}

/// Per-user data directory (`BACKOFFICE_DATA_DIR` overrides).
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BACKOFFICE_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.thesmall.backoffice")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "BACKOFFICE_DEPLOYED_URL",
            "BACKOFFICE_LOCAL_ORIGINS",
            "BACKOFFICE_HOSTNAME",
            "BACKOFFICE_PRODUCTION_DOMAINS",
            "BACKOFFICE_SESSION_STORE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_put_deployed_origin_last() {
        clear_env();
        let db = DbState::in_memory().expect("db");
        let config = BackendConfig::load(&db);
        let origins = config.origins();
        assert_eq!(origins.len(), DEFAULT_LOCAL_ORIGINS.len() + 1);
        assert!(origins[..origins.len() - 1]
            .iter()
            .all(|o| o.kind == OriginKind::Local));
        let last = origins.last().expect("deployed");
        assert_eq!(last.kind, OriginKind::Deployed);
        assert_eq!(last.base_url, DEFAULT_DEPLOYED_URL);
    }

    #[test]
    #[serial]
    fn stored_settings_then_env_override() {
        clear_env();
        let db = DbState::in_memory().expect("db");
        set_backend_setting(&db, "deployed_url", "api.tienda.co/api/").expect("set url");
        set_backend_setting(&db, "local_origins", "192.168.10.5:8000, localhost:9000")
            .expect("set locals");
        set_backend_setting(&db, "deployed_timeout_secs", "40").expect("set timeout");

        let config = BackendConfig::load(&db);
        assert_eq!(config.deployed_url, "https://api.tienda.co");
        assert_eq!(config.deployed_timeout, Duration::from_secs(40));
        let urls: Vec<String> = config.origins().into_iter().map(|o| o.base_url).collect();
        assert_eq!(
            urls,
            vec![
                "http://192.168.10.5:8000".to_string(),
                "http://localhost:9000".to_string(),
                "https://api.tienda.co".to_string(),
            ]
        );

        std::env::set_var("BACKOFFICE_DEPLOYED_URL", "https://override.tienda.co");
        std::env::set_var("BACKOFFICE_SESSION_STORE", "database");
        let config = BackendConfig::load(&db);
        assert_eq!(config.deployed_url, "https://override.tienda.co");
        assert_eq!(config.session_backend, SessionBackend::Database);
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_settings_are_rejected() {
        clear_env();
        let db = DbState::in_memory().expect("db");
        assert!(set_backend_setting(&db, "deployed_url", "  ").is_err());
        assert!(set_backend_setting(&db, "slow_timeout_secs", "-3").is_err());
        assert!(set_backend_setting(&db, "session_store", "cookie").is_err());
        assert!(set_backend_setting(&db, "colour", "blue").is_err());
    }

    #[test]
    #[serial]
    fn reset_returns_to_defaults() {
        clear_env();
        let db = DbState::in_memory().expect("db");
        set_backend_setting(&db, "hostname", "backoffice.thesmall.app").expect("set");
        reset_backend_settings(&db).expect("reset");
        assert_eq!(BackendConfig::load(&db).hostname, "localhost");
    }

    #[test]
    fn deployed_url_is_not_duplicated_as_local() {
        let config = BackendConfig {
            local_origins: vec![
                "http://localhost:8000".into(),
                "https://backoffice-api.thesmall.app".into(),
                "localhost:8000".into(),
            ],
            ..BackendConfig::default()
        };
        let urls: Vec<String> = config.origins().into_iter().map(|o| o.base_url).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:8000".to_string(),
                DEFAULT_DEPLOYED_URL.to_string()
            ]
        );
    }
}
