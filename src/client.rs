//! Blocking REST client for the tracker API.
//!
//! `ApiClient` is what the synchronizer talks to as its remote tier. It keeps
//! the session cookie handed out by `/api/login` and forgets it as soon as the
//! server answers 401.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::login::{AuthStatus, Credentials, SESSION_COOKIE, Theme, UserInfo};
use crate::renewal::{
    Analysis, AnalysisKind, ExpiringContract, PaymentReceipt, PaymentRequest, Renewal,
    RenewalRequest,
};
use crate::schema::RowVariant;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("session expired, please log in again")]
    Unauthorized,
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The remote persistence tier. Calls block; async callers go through
/// `spawn_blocking`.
pub trait RemoteTier: Send + Sync {
    fn load(&self, variant: RowVariant) -> Result<Vec<Value>, RemoteError>;
    fn save(&self, variant: RowVariant, records: &[Value]) -> Result<(), RemoteError>;
}

pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
    session: Mutex<Option<String>>,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:3000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(15))
            .build();
        ApiClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
            session: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Option<String> {
        self.session_slot().clone()
    }

    pub fn set_session(&self, id: Option<String>) {
        *self.session_slot() = id;
    }

    pub fn login(&self, username: &str, password: &str) -> Result<UserInfo, RemoteError> {
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: AuthStatus = self.send("POST", "/login", Some(&body))?;
        response
            .user
            .ok_or_else(|| RemoteError::Decode("login response carried no user".to_string()))
    }

    pub fn logout(&self) -> Result<(), RemoteError> {
        let result: Result<Value, _> = self.send::<(), _>("POST", "/logout", None);
        self.set_session(None);
        result.map(|_| ())
    }

    pub fn check_auth(&self) -> Result<AuthStatus, RemoteError> {
        match self.send::<(), AuthStatus>("GET", "/check-auth", None) {
            Err(RemoteError::Unauthorized) => Ok(AuthStatus {
                authenticated: false,
                user: None,
            }),
            other => other,
        }
    }

    pub fn set_theme(&self, theme: Theme) -> Result<UserInfo, RemoteError> {
        self.send("PUT", "/user/theme", Some(&json!({ "theme": theme })))
    }

    pub fn expiring_contracts(&self) -> Result<Vec<ExpiringContract>, RemoteError> {
        self.send::<(), _>("GET", "/contract-renewal/expiring", None)
    }

    pub fn analyze(&self, contract_id: u32, kind: AnalysisKind) -> Result<Analysis, RemoteError> {
        let body = json!({ "contract_id": contract_id, "analysis_type": kind });
        self.send("POST", "/contract-renewal/analyze", Some(&body))
    }

    pub fn process_renewal(&self, request: &RenewalRequest) -> Result<Renewal, RemoteError> {
        self.send("POST", "/contract-renewal/process-renewal", Some(request))
    }

    pub fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentReceipt, RemoteError> {
        self.send("POST", "/contract-renewal/process-payment", Some(request))
    }

    pub fn confirm_renewal(&self, renewal_id: u64) -> Result<Renewal, RemoteError> {
        let body = json!({ "renewal_id": renewal_id });
        self.send("POST", "/contract-renewal/confirm", Some(&body))
    }

    fn send<B, T>(&self, method: &str, path: &str, body: Option<&B>) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.agent.request(method, &url);
        if let Some(id) = self.session() {
            request = request.set("Cookie", &format!("{}={}", SESSION_COOKIE, id));
        }
        debug!(method, %url, "api request");

        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match result {
            Ok(response) => {
                if let Some(id) = response.header("set-cookie").and_then(session_from_cookie) {
                    self.set_session(Some(id));
                }
                response
                    .into_json::<T>()
                    .map_err(|e| RemoteError::Decode(e.to_string()))
            }
            Err(ureq::Error::Status(401, _)) => {
                warn!(%url, "api returned 401, clearing session");
                self.set_session(None);
                Err(RemoteError::Unauthorized)
            }
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_json::<Value>()
                    .ok()
                    .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| format!("API error: {}", status));
                Err(RemoteError::Status { status, message })
            }
            Err(ureq::Error::Transport(transport)) => Err(RemoteError::Transport(transport.to_string())),
        }
    }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RemoteTier for ApiClient {
    fn load(&self, variant: RowVariant) -> Result<Vec<Value>, RemoteError> {
        let path = variant.schema().endpoint;
        match self.send::<(), Value>("GET", path, None)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(RemoteError::Decode(format!(
                "expected an array of rows from {}, got {}",
                path, other
            ))),
        }
    }

    fn save(&self, variant: RowVariant, records: &[Value]) -> Result<(), RemoteError> {
        let body = json!({ "records": records });
        self.send::<Value, Value>("POST", variant.schema().endpoint, Some(&body))
            .map(|_| ())
    }
}

/// Pull the session id out of a `Set-Cookie` header value.
fn session_from_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name == SESSION_COOKIE && !value.is_empty() {
        Some(value.to_string())
    } else {
        None
    }
}
