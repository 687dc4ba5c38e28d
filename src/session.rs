//! Persisted login session.
//!
//! The session is two entries in the session store, `authToken` and
//! `authUser`, both Base64-encoded. The encoding only keeps the values from
//! being read at a glance; the server-issued token is the real credential.
//! Sessions older than [`SESSION_MAX_AGE_HOURS`] are discarded on load.
//!
//! Storage is a best-effort side channel: write failures are logged and the
//! in-memory state stays authoritative for the running process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::KeyValueStore;

pub const SESSION_MAX_AGE_HOURS: i64 = 8;

const KEY_TOKEN: &str = "authToken";
const KEY_USER: &str = "authUser";

/// The logged-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub email: String,
    pub name: String,
    pub role: String,
    pub login_time: DateTime<Utc>,
}

impl SessionUser {
    /// Expired iff strictly more than eight hours have passed since login.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.login_time > Duration::hours(SESSION_MAX_AGE_HOURS)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let left = self.login_time + Duration::hours(SESSION_MAX_AGE_HOURS) - now;
        left.max(Duration::zero())
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    token: String,
    user: SessionUser,
}

/// Session state shared by the HTTP client and the auth context.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    current: Mutex<Option<ActiveSession>>,
    login_redirect: AtomicBool,
}

impl SessionStore {
    /// Wrap `store` without reading it; call [`SessionStore::load`] next.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
            login_redirect: AtomicBool::new(false),
        }
    }

    pub fn load(&self) -> Option<SessionUser> {
        self.load_at(Utc::now())
    }

    /// Read the persisted token and user, discarding them when expired,
    /// incomplete or undecodable.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<SessionUser> {
        let raw_token = self.store.get(KEY_TOKEN);
        let raw_user = self.store.get(KEY_USER);

        let (raw_token, raw_user) = match (raw_token, raw_user) {
            (Some(t), Some(u)) => (t, u),
            (None, None) => {
                self.set_current(None);
                return None;
            }
            _ => {
                warn!("incomplete stored session, clearing");
                self.clear();
                return None;
            }
        };

        let decoded = decode_text(&raw_token).zip(
            decode_text(&raw_user).and_then(|u| serde_json::from_str::<SessionUser>(&u).ok()),
        );
        let Some((token, user)) = decoded else {
            warn!("stored session could not be decoded, clearing");
            self.clear();
            return None;
        };

        if user.is_expired_at(now) {
            info!(email = %user.email, login_time = %user.login_time, "stored session expired");
            self.clear();
            return None;
        }

        debug!(email = %user.email, "restored session");
        self.set_current(Some(ActiveSession {
            token,
            user: user.clone(),
        }));
        Some(user)
    }

    /// Persist a freshly issued session and make it current.
    pub fn save(&self, token: &str, user: &SessionUser) {
        match serde_json::to_string(user) {
            Ok(user_json) => {
                if let Err(e) = self.store.set(KEY_TOKEN, &encode_text(token)) {
                    warn!(error = %e, "failed to persist session token");
                }
                if let Err(e) = self.store.set(KEY_USER, &encode_text(&user_json)) {
                    warn!(error = %e, "failed to persist session user");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize session user"),
        }
        self.login_redirect.store(false, Ordering::SeqCst);
        self.set_current(Some(ActiveSession {
            token: token.to_string(),
            user: user.clone(),
        }));
    }

    /// Drop persisted and in-memory session state.
    pub fn clear(&self) {
        for key in [KEY_TOKEN, KEY_USER] {
            if let Err(e) = self.store.delete(key) {
                warn!(key, error = %e, "failed to delete stored session entry");
            }
        }
        self.set_current(None);
    }

    /// Called when the backend rejects the token: the session is dropped and
    /// the operator is sent back to login.
    pub fn expire_and_redirect(&self) {
        warn!("backend rejected the session, login required");
        self.clear();
        self.login_redirect.store(true, Ordering::SeqCst);
    }

    /// Whether a login redirect was requested since the last call.
    pub fn take_login_redirect(&self) -> bool {
        self.login_redirect.swap(false, Ordering::SeqCst)
    }

    pub fn token(&self) -> Option<String> {
        self.lock_current().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.lock_current().as_ref().map(|s| s.user.clone())
    }

    /// Token and user both present. No expiry check beyond the load sweep.
    pub fn is_authenticated(&self) -> bool {
        self.lock_current()
            .as_ref()
            .map(|s| !s.token.is_empty())
            .unwrap_or(false)
    }

    fn set_current(&self, value: Option<ActiveSession>) {
        *self.lock_current() = value;
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode_text(value: &str) -> String {
    BASE64_STANDARD.encode(value.as_bytes())
}

fn decode_text(value: &str) -> Option<String> {
    let bytes = BASE64_STANDARD.decode(value.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
