//! Backend REST client with origin failover.
//!
//! The back office can reach the backend through several origins: servers
//! on the store LAN, a localhost instance, and the deployed host. When the
//! client runs on a local/LAN host it walks the origins in priority order,
//! starting with the last one that answered successfully. When it runs on a
//! production host it talks to the deployed origin only.
//!
//! Failure handling per call:
//! - connection failures and timeouts move on to the next origin;
//! - a non-OK answer moves on as well, and forgets the remembered origin
//!   when it was the one answering;
//! - HTTP 401 is fatal: the session is cleared, a login redirect is
//!   signalled and nothing else is tried;
//! - each origin is attempted at most once.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::BackendConfig;
use crate::session::SessionStore;

/// Timeout used by the connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints that routinely take longer than the deployed default.
const SLOW_ENDPOINTS: &[&str] = &[
    "/api/analytics/customer-retention",
    "/api/analytics/cross-selling",
    "/api/analytics/sales-trends",
    "/api/direct/inventory/value-report",
    "/api/direct/sales/documents",
];

const PRIVATE_PREFIXES: &[&str] = &["10.", "192.168."];

// ---------------------------------------------------------------------------
// Origins and environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Local,
    Deployed,
}

/// A candidate backend base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub base_url: String,
    pub kind: OriginKind,
}

/// Where the client itself is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Deployed,
}

impl Environment {
    /// Production domains (and their subdomains) are deployed; localhost and
    /// private-network addresses are local; anything else is deployed.
    pub fn detect(hostname: &str, production_domains: &[String]) -> Self {
        let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
        let is_production = production_domains.iter().any(|domain| {
            let domain = domain.trim().to_ascii_lowercase();
            !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
        });
        if is_production {
            return Self::Deployed;
        }
        if is_local_host(&host) {
            Self::Local
        } else {
            Self::Deployed
        }
    }
}

fn is_local_host(host: &str) -> bool {
    if matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]") || host.ends_with(".local") {
        return true;
    }
    if PRIVATE_PREFIXES.iter().any(|p| host.starts_with(p)) {
        return true;
    }
    // 172.16.0.0/12
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|s| s.parse::<u8>().ok()) {
            return (16..=31).contains(&second);
        }
    }
    false
}

/// Normalise an origin URL:
/// - ensure a scheme is present (http for local hosts, https otherwise)
/// - strip trailing slashes and a trailing `/api` segment
///
/// Blank input stays blank.
pub fn normalize_origin_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        let host = url
            .split(['/', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if is_local_host(&host) {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// The workable-origin memo: the base URL that last answered with success.
///
/// Owned by whoever builds the client so tests and separate clients do not
/// share it by accident. Concurrent calls may both probe before either
/// remembers; the worst case is a redundant probe.
#[derive(Debug, Default)]
pub struct ConnectionState {
    working: Mutex<Option<String>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remembered(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn remember(&self, base_url: &str) {
        let mut working = self.lock();
        if working.as_deref() != Some(base_url) {
            info!(origin = %base_url, "remembering working backend origin");
            *working = Some(base_url.to_string());
        }
    }

    pub fn forget(&self) {
        if let Some(previous) = self.lock().take() {
            debug!(origin = %previous, "forgetting backend origin");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Serialized JSON request body.
///
/// The bytes are written once, wiped on drop, and shared between the
/// attempts of a failover walk instead of being copied per origin.
#[derive(Clone)]
pub struct RequestBody {
    bytes: Arc<Zeroizing<Vec<u8>>>,
}

/// `io::Write` that only measures.
struct ByteCounter(usize);

impl std::io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl RequestBody {
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ApiError> {
        let invalid = |e: serde_json::Error| ApiError::InvalidRequest(format!("Invalid request body: {e}"));
        // Size first so the buffer never reallocates and leaves stale copies behind.
        let mut counter = ByteCounter(0);
        serde_json::to_writer(&mut counter, value).map_err(invalid)?;
        let mut bytes = Zeroizing::new(Vec::with_capacity(counter.0));
        serde_json::to_writer(&mut *bytes, value).map_err(invalid)?;
        Ok(Self {
            bytes: Arc::new(bytes),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parsed copy of the body, for inspection.
    pub fn to_value(&self) -> Option<Value> {
        serde_json::from_slice(&self.bytes).ok()
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestBody({} bytes)", self.bytes.len())
    }
}

/// A single request against a single origin.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    pub bearer: Option<String>,
    pub timeout: Duration,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("backoffice-pos/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout)
            .header("X-Request-Id", &request.request_id)
            .header("Accept", "application/json");
        if let Some(token) = request.bearer.as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            // reqwest owns its send buffer; this copy lives only as long as the request.
            req = req
                .header("Content-Type", "application/json")
                .body(body.as_bytes().to_vec());
        }

        let resp = req.send().await.map_err(|e| classify(&request.url, &e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| classify(&request.url, &e))?;
        Ok(HttpResponse { status, body })
    }
}

fn classify(url: &str, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if err.is_connect() {
        return TransportError::Connect(format!("Cannot reach backend at {url}"));
    }
    TransportError::Other(format!("Network error communicating with {url}: {err}"))
}

// ---------------------------------------------------------------------------
// Errors and responses
// ---------------------------------------------------------------------------

/// One origin that could not serve a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub origin: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Session expired, please log in again")]
    Unauthorized,
    #[error("{message} (HTTP {status})")]
    Http {
        status: u16,
        message: String,
        origin: String,
    },
    #[error("Could not reach any server ({} origins tried)", .attempts.len())]
    AllOriginsFailed { attempts: Vec<AttemptFailure> },
    #[error("Request cancelled")]
    Cancelled,
    #[error("Invalid JSON from backend: {0}")]
    InvalidJson(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Errors an operator can reasonably retry by hand.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AllOriginsFailed { .. } | Self::Cancelled => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A successful (2xx) backend answer.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub origin: Origin,
    pub body: Value,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.body.clone()).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }
}

/// Convert an HTTP status code into an operator-facing message.
fn status_error(status: u16) -> String {
    match status {
        401 => "Session expired or invalid".to_string(),
        403 => "Not authorized for this report".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => "Backend server error".to_string(),
        _ => "Unexpected response from backend".to_string(),
    }
}

/// Server-supplied `error` / `message`, falling back to the status text. A
/// missing or non-JSON body is treated as an empty object.
pub fn error_message(status: u16, body: &str) -> String {
    let json = serde_json::from_str::<Value>(body).unwrap_or_else(|_| serde_json::json!({}));
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| status_error(status))
}

// ---------------------------------------------------------------------------
// Fetch options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Replaces the deployed-origin timeout for this call.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            body: None,
            timeout: None,
            cancel: None,
        }
    }
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post<T: Serialize + ?Sized>(body: &T) -> Result<Self, ApiError> {
        Ok(Self::post_body(RequestBody::serialize(body)?))
    }

    pub fn post_body(body: RequestBody) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of probing one origin's health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OriginProbe {
    pub origin: Origin,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    origins: Vec<Origin>,
    environment: Environment,
    local_timeout: Duration,
    deployed_timeout: Duration,
    slow_timeout: Duration,
    state: Arc<ConnectionState>,
    transport: Arc<dyn Transport>,
    session: Arc<SessionStore>,
}

enum Attempt {
    Answered(HttpResponse),
    Failed(String),
    Cancelled,
}

impl ApiClient {
    pub fn new(
        config: &BackendConfig,
        state: Arc<ConnectionState>,
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
    ) -> Self {
        let environment = config.environment();
        info!(
            environment = ?environment,
            hostname = %config.hostname,
            origins = config.origins().len(),
            "backend client configured"
        );
        Self {
            origins: config.origins(),
            environment,
            local_timeout: config.local_timeout,
            deployed_timeout: config.deployed_timeout,
            slow_timeout: config.slow_timeout,
            state,
            transport,
            session,
        }
    }

    /// Client over the real network with a fresh connection memo.
    pub fn from_config(config: &BackendConfig, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        Ok(Self::new(
            config,
            Arc::new(ConnectionState::new()),
            Arc::new(ReqwestTransport::new()?),
            session,
        ))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Origins in the order this call will try them.
    pub fn plan(&self) -> Vec<Origin> {
        match self.environment {
            Environment::Deployed => self
                .origins
                .iter()
                .filter(|o| o.kind == OriginKind::Deployed)
                .cloned()
                .collect(),
            Environment::Local => {
                let mut plan = Vec::with_capacity(self.origins.len());
                if let Some(remembered) = self.state.remembered() {
                    if let Some(origin) = self.origins.iter().find(|o| o.base_url == remembered) {
                        plan.push(origin.clone());
                    }
                }
                for origin in &self.origins {
                    if !plan.contains(origin) {
                        plan.push(origin.clone());
                    }
                }
                plan
            }
        }
    }

    /// Per-attempt timeout for `origin` on `path`.
    pub fn timeout_for(&self, origin: &Origin, path: &str, override_timeout: Option<Duration>) -> Duration {
        match origin.kind {
            OriginKind::Local => self.local_timeout,
            OriginKind::Deployed => override_timeout.unwrap_or_else(|| {
                if is_slow_endpoint(path) {
                    self.slow_timeout
                } else {
                    self.deployed_timeout
                }
            }),
        }
    }

    /// Issue `path` against the first origin able to answer it.
    pub async fn authenticated_fetch(
        &self,
        path: &str,
        options: FetchOptions,
    ) -> Result<ApiResponse, ApiError> {
        if !path.starts_with('/') || path.contains("..") {
            return Err(ApiError::InvalidRequest(format!("Invalid API path: {path}")));
        }

        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("api", %request_id, method = %options.method, %path);
        self.fetch_inner(path, options, request_id)
            .instrument(span)
            .await
    }

    async fn fetch_inner(
        &self,
        path: &str,
        options: FetchOptions,
        request_id: String,
    ) -> Result<ApiResponse, ApiError> {
        let plan = self.plan();
        let remembered = self.state.remembered();
        let bearer = self.session.token();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut last_rejection: Option<ApiError> = None;

        for origin in &plan {
            let url = build_url(&origin.base_url, path, &options.query)?;
            let timeout = self.timeout_for(origin, path, options.timeout);
            let is_remembered = remembered.as_deref() == Some(origin.base_url.as_str());

            let request = HttpRequest {
                method: options.method.clone(),
                url,
                body: options.body.clone(),
                bearer: bearer.clone(),
                timeout,
                request_id: request_id.clone(),
            };

            let started = Instant::now();
            match self.attempt(request, timeout, options.cancel.as_ref()).await {
                Attempt::Cancelled => {
                    info!(origin = %origin.base_url, "request cancelled by caller");
                    return Err(ApiError::Cancelled);
                }
                Attempt::Answered(resp) if resp.status == StatusCode::UNAUTHORIZED.as_u16() => {
                    self.session.expire_and_redirect();
                    return Err(ApiError::Unauthorized);
                }
                Attempt::Answered(resp) if (200..300).contains(&resp.status) => {
                    debug!(
                        origin = %origin.base_url,
                        status = resp.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "backend answered"
                    );
                    if self.environment == Environment::Local {
                        self.state.remember(&origin.base_url);
                    }
                    let body = parse_body(&resp.body)?;
                    return Ok(ApiResponse {
                        status: resp.status,
                        origin: origin.clone(),
                        body,
                    });
                }
                Attempt::Answered(resp) => {
                    let message = error_message(resp.status, &resp.body);
                    warn!(
                        origin = %origin.base_url,
                        status = resp.status,
                        error = %message,
                        "backend answered with an error, trying next origin"
                    );
                    if is_remembered {
                        self.state.forget();
                    }
                    failures.push(AttemptFailure {
                        origin: origin.base_url.clone(),
                        reason: format!("HTTP {}: {message}", resp.status),
                    });
                    if origin.kind == OriginKind::Deployed {
                        last_rejection = Some(ApiError::Http {
                            status: resp.status,
                            message,
                            origin: origin.base_url.clone(),
                        });
                    }
                }
                Attempt::Failed(reason) => {
                    debug!(origin = %origin.base_url, %reason, "origin unreachable");
                    if is_remembered {
                        self.state.forget();
                    }
                    failures.push(AttemptFailure {
                        origin: origin.base_url.clone(),
                        reason,
                    });
                }
            }
        }

        if let Some(rejection) = last_rejection {
            return Err(rejection);
        }
        warn!(attempts = failures.len(), "no backend origin reachable");
        Err(ApiError::AllOriginsFailed { attempts: failures })
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Attempt {
        let send = tokio::time::timeout(timeout, self.transport.send(request));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Attempt::Cancelled,
                outcome = send => outcome,
            },
            None => send.await,
        };
        match outcome {
            Err(_elapsed) => Attempt::Failed(format!("timed out after {}s", timeout.as_secs())),
            Ok(Err(e)) => Attempt::Failed(e.to_string()),
            Ok(Ok(resp)) => Attempt::Answered(resp),
        }
    }

    /// Probe `/api/health` on every configured origin.
    pub async fn test_connectivity(&self) -> Vec<OriginProbe> {
        let mut probes = Vec::with_capacity(self.origins.len());
        for origin in &self.origins {
            let request = HttpRequest {
                method: Method::GET,
                url: format!("{}/api/health", origin.base_url),
                body: None,
                bearer: None,
                timeout: CONNECTIVITY_TIMEOUT,
                request_id: Uuid::new_v4().to_string(),
            };
            let started = Instant::now();
            let probe = match self.attempt(request, CONNECTIVITY_TIMEOUT, None).await {
                Attempt::Answered(resp) if (200..300).contains(&resp.status) => OriginProbe {
                    origin: origin.clone(),
                    success: true,
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    error: None,
                },
                Attempt::Answered(resp) => OriginProbe {
                    origin: origin.clone(),
                    success: false,
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    error: Some(format!(
                        "{} (HTTP {})",
                        error_message(resp.status, &resp.body),
                        resp.status
                    )),
                },
                Attempt::Failed(reason) => OriginProbe {
                    origin: origin.clone(),
                    success: false,
                    latency_ms: None,
                    error: Some(reason),
                },
                Attempt::Cancelled => continue,
            };
            info!(origin = %origin.base_url, success = probe.success, "connectivity probe");
            probes.push(probe);
        }
        probes
    }
}

fn is_slow_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    SLOW_ENDPOINTS.iter().any(|slow| path.starts_with(slow))
}

fn build_url(base: &str, path: &str, query: &[(String, String)]) -> Result<String, ApiError> {
    let mut url = Url::parse(&format!("{base}{path}"))
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid backend URL {base}{path}: {e}")))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// JSON body, or null for an empty (e.g. 204) answer.
fn parse_body(body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| ApiError::InvalidJson(e.to_string()))
}
