//! Key/value persistence for client-side state.
//!
//! Two backends share one trait: the OS credential store (Keychain, DPAPI,
//! Secret Service via the `keyring` crate) for the session token, and the
//! local SQLite `local_settings` table for everything that should survive
//! like browser local storage (drafts, lockout counters). Reads never fail;
//! writes report errors and callers decide whether to log or propagate.

use std::sync::Arc;

use keyring::Entry;
use tracing::warn;

use crate::db::{self, DbState};

const SERVICE_NAME: &str = "backoffice-pos";

/// Minimal string store used by the session and draft layers.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    /// Succeeds when the key does not exist.
    fn delete(&self, key: &str) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// Store backed by the OS credential store.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(&self.service, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let entry = Entry::new(&self.service, key).map_err(|e| e.to_string())?;
        entry.set_password(value).map_err(|e| e.to_string())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let entry = Entry::new(&self.service, key).map_err(|e| e.to_string())?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// SQLite local_settings
// ---------------------------------------------------------------------------

/// Store backed by one category of the `local_settings` table.
pub struct DbStore {
    db: Arc<DbState>,
    category: String,
}

impl DbStore {
    pub fn new(db: Arc<DbState>, category: &str) -> Self {
        Self {
            db,
            category: category.to_string(),
        }
    }
}

impl KeyValueStore for DbStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.db.conn.lock() {
            Ok(conn) => db::get_setting(&conn, &self.category, key),
            Err(e) => {
                warn!(key, error = %e, "local store: connection lock poisoned");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, &self.category, key, value)
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let conn = self.db.conn.lock().map_err(|e| e.to_string())?;
        db::delete_setting(&conn, &self.category, key)
    }
}

/// Which backend holds the session entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Keyring,
    Database,
}

impl SessionBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keyring" | "os" => Some(Self::Keyring),
            "database" | "db" | "sqlite" => Some(Self::Database),
            _ => None,
        }
    }
}

/// Build the store that persists the session for `backend`.
pub fn session_store_for(backend: SessionBackend, db: Arc<DbState>) -> Arc<dyn KeyValueStore> {
    match backend {
        SessionBackend::Keyring => Arc::new(KeyringStore::new()),
        SessionBackend::Database => Arc::new(DbStore::new(db, "session")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_store_round_trip_is_scoped_to_category() {
        let db = Arc::new(DbState::in_memory().expect("db"));
        let drafts = DbStore::new(db.clone(), "drafts");
        let session = DbStore::new(db, "session");

        drafts.set("authToken", "draft-value").expect("set");
        assert_eq!(drafts.get("authToken").as_deref(), Some("draft-value"));
        assert!(session.get("authToken").is_none());

        drafts.delete("authToken").expect("delete");
        assert!(drafts.get("authToken").is_none());
        drafts.delete("authToken").expect("delete missing");
    }

    #[test]
    fn session_backend_parses_aliases() {
        assert_eq!(SessionBackend::parse("keyring"), Some(SessionBackend::Keyring));
        assert_eq!(SessionBackend::parse(" DB "), Some(SessionBackend::Database));
        assert_eq!(SessionBackend::parse("sqlite"), Some(SessionBackend::Database));
        assert_eq!(SessionBackend::parse("cookie"), None);
    }
}
