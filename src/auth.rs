//! Operator login against the backend, with lockout tracking.
//!
//! Credentials are checked server-side (`POST /auth/login`). Before any
//! network call the email shape and password length are validated, and
//! repeated failures lock further attempts: after five consecutive rejected
//! logins the client refuses to contact the backend for fifteen minutes.
//! The lockout counter lives in the local store so a restart does not reset
//! it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::api::{ApiClient, ApiError, FetchOptions, RequestBody};
use crate::session::{SessionStore, SessionUser};
use crate::storage::KeyValueStore;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
pub const MIN_PASSWORD_LEN: usize = 6;
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";
const LOGIN_PATH: &str = "/auth/login";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Enter a valid email address")]
    InvalidEmail,
    #[error("Password must be at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,
    #[error("Too many failed attempts. Try again in {remaining_minutes} minute(s).")]
    LockedOut { remaining_minutes: i64 },
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Login rejected: {0}")]
    Rejected(String),
    #[error("Unexpected login response: {0}")]
    BadResponse(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    /// Raised before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidEmail | Self::PasswordTooShort)
    }
}

/// Lockout tracking entry.
#[derive(Debug, Clone, Copy)]
struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// Current lockout standing, for display.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStatus {
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    token: String,
    #[serde(default)]
    user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "full_name", alias = "fullName")]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Login state for the running client.
pub struct AuthContext {
    api: ApiClient,
    session: Arc<SessionStore>,
    local: Arc<dyn KeyValueStore>,
    lockout: Mutex<LockoutEntry>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Loose email shape check: `local@domain.tld`, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty() && !name.starts_with('.'),
        None => false,
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if !is_valid_email(email) {
        return Err(AuthError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }
    Ok(())
}

/// Reject while locked; once the window has passed the counter starts over.
fn check_lockout(lockout: &mut LockoutEntry, now: DateTime<Utc>) -> Result<(), AuthError> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = now - lockout.last_attempt;
        let window = Duration::minutes(LOCKOUT_MINUTES);
        if elapsed < window {
            let remaining_secs = (window - elapsed).num_seconds().max(1);
            let remaining_minutes = (remaining_secs + 59) / 60;
            return Err(AuthError::LockedOut { remaining_minutes });
        }
        info!("lockout window elapsed, resetting failed attempts");
        lockout.attempts = 0;
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry, now: DateTime<Utc>) {
    lockout.attempts += 1;
    lockout.last_attempt = now;
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry, now: DateTime<Utc>) {
    lockout.attempts = 0;
    lockout.last_attempt = now;
}

fn load_lockout(local: &dyn KeyValueStore, now: DateTime<Utc>) -> LockoutEntry {
    let attempts = local
        .get(LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = local
        .get(LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout(local: &dyn KeyValueStore, lockout: &LockoutEntry) {
    if let Err(e) = local.set(LOCKOUT_ATTEMPTS_KEY, &lockout.attempts.to_string()) {
        warn!(error = %e, "failed to persist lockout attempts");
    }
    if let Err(e) = local.set(LOCKOUT_LAST_ATTEMPT_KEY, &lockout.last_attempt.to_rfc3339()) {
        warn!(error = %e, "failed to persist lockout timestamp");
    }
}

fn session_user_from(response: &LoginResponse, email: &str, now: DateTime<Utc>) -> SessionUser {
    let user = response.user.as_ref();
    let email = user
        .and_then(|u| u.email.clone())
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| email.to_string());
    let name = user
        .and_then(|u| u.name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.clone());
    let role = user
        .and_then(|u| u.role.clone())
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "cashier".to_string());
    SessionUser {
        email,
        name,
        role,
        login_time: now,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl AuthContext {
    /// Build the context and sweep an expired stored session.
    pub fn new(api: ApiClient, session: Arc<SessionStore>, local: Arc<dyn KeyValueStore>) -> Self {
        session.load();
        let lockout = load_lockout(local.as_ref(), Utc::now());
        Self {
            api,
            session,
            local,
            lockout: Mutex::new(lockout),
        }
    }

    pub async fn login(&self, email: &str, password: Zeroizing<String>) -> Result<SessionUser, AuthError> {
        self.login_at(email, password, Utc::now()).await
    }

    /// Login with an explicit clock.
    pub async fn login_at(
        &self,
        email: &str,
        password: Zeroizing<String>,
        now: DateTime<Utc>,
    ) -> Result<SessionUser, AuthError> {
        let email = email.trim().to_ascii_lowercase();
        validate_credentials(&email, &password)?;

        // Persisted state wins so a second process sees the same counter.
        {
            let mut lockout = self.lock_lockout();
            *lockout = load_lockout(self.local.as_ref(), now);
            let before = lockout.attempts;
            check_lockout(&mut lockout, now)?;
            if lockout.attempts != before {
                persist_lockout(self.local.as_ref(), &lockout);
            }
        }

        let body = RequestBody::serialize(&LoginRequest {
            email: &email,
            password: password.as_str(),
        })?;
        let result = self
            .api
            .authenticated_fetch(LOGIN_PATH, FetchOptions::post_body(body))
            .await;

        match result {
            Ok(resp) => {
                let parsed: LoginResponse = serde_json::from_value(resp.body.clone())
                    .map_err(|e| AuthError::BadResponse(e.to_string()))?;
                if parsed.token.trim().is_empty() {
                    return Err(AuthError::BadResponse("empty token".into()));
                }
                let user = session_user_from(&parsed, &email, now);
                {
                    let mut lockout = self.lock_lockout();
                    reset_lockout(&mut lockout, now);
                    persist_lockout(self.local.as_ref(), &lockout);
                }
                self.session.save(parsed.token.trim(), &user);
                info!(email = %user.email, role = %user.role, origin = %resp.origin.base_url, "login successful");
                Ok(user)
            }
            Err(ApiError::Unauthorized) => {
                // Already on the login screen; the redirect signal is moot.
                self.session.take_login_redirect();
                self.register_failure(now);
                Err(AuthError::InvalidCredentials)
            }
            Err(ApiError::Http {
                status: 400 | 403 | 404 | 422,
                message,
                ..
            }) => {
                self.register_failure(now);
                Err(AuthError::Rejected(message))
            }
            Err(other) => Err(AuthError::Api(other)),
        }
    }

    fn register_failure(&self, now: DateTime<Utc>) {
        let mut lockout = self.lock_lockout();
        record_failure(&mut lockout, now);
        persist_lockout(self.local.as_ref(), &lockout);
    }

    /// Clear persisted and in-memory session state unconditionally.
    pub fn logout(&self) {
        if let Some(user) = self.session.user() {
            info!(email = %user.email, "logged out");
        }
        self.session.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.session.user()
    }

    pub fn lockout_status(&self) -> LockoutStatus {
        let lockout = load_lockout(self.local.as_ref(), Utc::now());
        let locked_until = (lockout.attempts >= MAX_FAILED_ATTEMPTS)
            .then(|| lockout.last_attempt + Duration::minutes(LOCKOUT_MINUTES))
            .filter(|until| *until > Utc::now());
        LockoutStatus {
            failed_attempts: lockout.attempts,
            locked_until,
        }
    }

    fn lock_lockout(&self) -> std::sync::MutexGuard<'_, LockoutEntry> {
        self.lockout.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{client_with, test_session, Scripted, ScriptedTransport, DEPLOYED};
    use crate::db::DbState;
    use crate::storage::DbStore;
    use serde_json::json;

    fn local_store() -> Arc<dyn KeyValueStore> {
        let db = Arc::new(DbState::in_memory().expect("db"));
        Arc::new(DbStore::new(db, "auth"))
    }

    fn deployed_context(
        transport: Arc<ScriptedTransport>,
        local: Arc<dyn KeyValueStore>,
    ) -> AuthContext {
        let session = test_session();
        let api = client_with("backoffice.tienda.co", transport, session.clone());
        AuthContext::new(api, session, local)
    }

    fn pw(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    fn ok_login() -> Scripted {
        Scripted::Json(
            200,
            serde_json::json!({
                "token": "srv-token",
                "user": { "email": "ana@tienda.co", "name": "Ana", "role": "admin" }
            }),
        )
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ana@tienda.co"));
        assert!(is_valid_email("  caja.1@sub.tienda.co "));
        assert!(!is_valid_email("ana"));
        assert!(!is_valid_email("ana@"));
        assert!(!is_valid_email("@tienda.co"));
        assert!(!is_valid_email("ana@tienda"));
        assert!(!is_valid_email("ana@tienda."));
        assert!(!is_valid_email("a na@tienda.co"));
        assert!(!is_valid_email("a@b@tienda.co"));
    }

    #[tokio::test]
    async fn validation_happens_before_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let auth = deployed_context(transport.clone(), local_store());

        let err = auth.login("not-an-email", pw("secret123")).await.expect_err("bad email");
        assert!(matches!(err, AuthError::InvalidEmail));
        assert!(err.is_validation());
        let err = auth.login("ana@tienda.co", pw("123")).await.expect_err("short");
        assert!(matches!(err, AuthError::PasswordTooShort));
        assert!(transport.called_origins().is_empty());
        assert_eq!(auth.lockout_status().failed_attempts, 0);
    }

    #[tokio::test]
    async fn successful_login_persists_session() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![ok_login()]);
        let auth = deployed_context(transport.clone(), local_store());

        let user = auth.login("Ana@Tienda.co", pw("secret123")).await.expect("login");
        assert_eq!(user.name, "Ana");
        assert_eq!(user.role, "admin");
        assert!(auth.is_authenticated());

        let calls = transport.calls.lock().expect("calls");
        assert_eq!(calls[0].method, reqwest::Method::POST);
        assert_eq!(
            calls[0].body.as_ref().and_then(|b| b.to_value()),
            Some(json!({ "email": "ana@tienda.co", "password": "secret123" }))
        );
    }

    #[tokio::test]
    async fn sixth_attempt_is_locked_without_network() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![Scripted::Status(401, ""); 5]);
        let auth = deployed_context(transport.clone(), local_store());
        let now = Utc::now();

        for i in 0..MAX_FAILED_ATTEMPTS {
            let err = auth
                .login_at("ana@tienda.co", pw("wrong-pass"), now + Duration::seconds(i64::from(i)))
                .await
                .expect_err("rejected");
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        assert_eq!(transport.called_origins().len(), 5);

        let err = auth
            .login_at("ana@tienda.co", pw("secret123"), now + Duration::minutes(1))
            .await
            .expect_err("locked");
        match err {
            AuthError::LockedOut { remaining_minutes } => {
                assert!(remaining_minutes > 0);
                assert!(remaining_minutes <= LOCKOUT_MINUTES);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(transport.called_origins().len(), 5, "locked attempt must not hit the backend");
    }

    #[tokio::test]
    async fn lockout_expires_and_correct_login_succeeds() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut steps = vec![Scripted::Status(401, ""); 5];
        steps.push(ok_login());
        transport.script(DEPLOYED, steps);
        let local = local_store();
        let auth = deployed_context(transport.clone(), local.clone());
        let now = Utc::now();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let _ = auth.login_at("ana@tienda.co", pw("wrong-pass"), now).await;
        }
        let later = now + Duration::minutes(LOCKOUT_MINUTES) + Duration::seconds(1);
        let user = auth
            .login_at("ana@tienda.co", pw("secret123"), later)
            .await
            .expect("lockout elapsed");
        assert_eq!(user.email, "ana@tienda.co");
        assert_eq!(local.get(LOCKOUT_ATTEMPTS_KEY).as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn lockout_persists_across_restart() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![Scripted::Status(401, ""); 5]);
        let local = local_store();
        let before_restart = deployed_context(transport.clone(), local.clone());

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let _ = before_restart.login("ana@tienda.co", pw("wrong-pass")).await;
        }

        let after_restart = deployed_context(transport.clone(), local.clone());
        let err = after_restart
            .login("ana@tienda.co", pw("wrong-pass"))
            .await
            .expect_err("still locked");
        assert!(matches!(err, AuthError::LockedOut { .. }));
        assert!(after_restart.lockout_status().locked_until.is_some());
        assert_eq!(
            local.get(LOCKOUT_ATTEMPTS_KEY).as_deref(),
            Some("5"),
            "blocked attempt should not increment the counter"
        );
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            DEPLOYED,
            vec![Scripted::Status(401, ""), Scripted::Status(401, ""), ok_login()],
        );
        let auth = deployed_context(transport, local_store());
        let _ = auth.login("ana@tienda.co", pw("wrong-pass")).await;
        let _ = auth.login("ana@tienda.co", pw("wrong-pass")).await;
        assert_eq!(auth.lockout_status().failed_attempts, 2);

        auth.login("ana@tienda.co", pw("secret123")).await.expect("login");
        assert_eq!(auth.lockout_status().failed_attempts, 0);
    }

    #[tokio::test]
    async fn unreachable_backend_does_not_count_as_failure() {
        let transport = Arc::new(ScriptedTransport::default());
        let auth = deployed_context(transport, local_store());
        let err = auth
            .login("ana@tienda.co", pw("secret123"))
            .await
            .expect_err("offline");
        assert!(matches!(err, AuthError::Api(ApiError::AllOriginsFailed { .. })));
        assert_eq!(auth.lockout_status().failed_attempts, 0);
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![ok_login()]);
        let auth = deployed_context(transport, local_store());
        auth.login("ana@tienda.co", pw("secret123")).await.expect("login");

        auth.logout();
        assert!(!auth.is_authenticated());
        assert!(auth.current_user().is_none());
        auth.logout();
    }

    #[tokio::test]
    async fn response_without_user_falls_back_to_email() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(
            DEPLOYED,
            vec![Scripted::Json(200, serde_json::json!({ "access_token": "t" }))],
        );
        let auth = deployed_context(transport, local_store());
        let user = auth.login("ana@tienda.co", pw("secret123")).await.expect("login");
        assert_eq!(user.name, "ana@tienda.co");
        assert_eq!(user.role, "cashier");
    }
}
