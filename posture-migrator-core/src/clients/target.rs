//! Target-system client: token session, JSON calls, conflict detection.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use posture_migrator_common::{
    classify_transport_error, retry_with_backoff, ApiError, ApiResult, Attempt, RetryError, RetryPolicy,
    TargetSession,
};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::clients::TargetApi;
use crate::types::{
    AccountGroup, AccountGroupRequest, AlertRuleRequest, CloudAccount, CloudProvider, NamedEntity,
    UserRequest, UserRoleRequest,
};

pub const DEFAULT_TARGET_URL: &str = "https://api.redlock.io";

const AUTH_HEADER: &str = "x-redlock-auth";
const STATUS_HEADER: &str = "x-redlock-status";
const LOGIN_PATH: &str = "/login";

/// Status keys the target uses when a named asset already exists.
const ALREADY_EXISTS_KEYS: &[&str] = &[
    "account_group_name_already_exists",
    "user_role_name_already_exists",
    "duplicate_user_name",
];

/// Returned instead of a name conflict when a group name is taken.
const GROUP_NAME_TAKEN_KEY: &str = "invalid_param_value";

/// Failure of one request attempt.
#[derive(Debug, Error)]
enum CallError {
    /// The server rejected the session token on a regular call.
    #[error(transparent)]
    TokenRejected(ApiError),
    #[error(transparent)]
    Api(ApiError),
}

impl CallError {
    fn into_api(self) -> ApiError {
        match self {
            Self::TokenRejected(e) | Self::Api(e) => e,
        }
    }
}

fn api_attempt<T>(result: ApiResult<T>) -> Attempt<T, CallError> {
    match ApiError::into_attempt(result) {
        Attempt::Success(value) => Attempt::Success(value),
        Attempt::Retryable(e) => Attempt::Retryable(CallError::Api(e)),
        Attempt::Fatal(e) => Attempt::Fatal(CallError::Api(e)),
    }
}

#[derive(Clone)]
pub struct TargetCredentials {
    pub username: String,
    pub password: String,
    /// Tenant name, for users that belong to several.
    pub customer_name: Option<String>,
}

impl std::fmt::Debug for TargetCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("customer_name", &self.customer_name)
            .finish()
    }
}

pub struct TargetClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: TargetCredentials,
    session: Mutex<TargetSession>,
    retry: RetryPolicy,
}

impl TargetClient {
    pub fn new(
        base_url: &str,
        credentials: TargetCredentials,
        retry: RetryPolicy,
        timeout: Duration,
        refresh_after: Duration,
    ) -> ApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid target URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            session: Mutex::new(TargetSession::new(refresh_after)),
            retry,
        })
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Config(format!("bad target path '{path}': {e}")))
    }

    /// A valid token, logging in first when the session is stale.
    async fn token(&self) -> ApiResult<String> {
        let mut session = self.session.lock().await;
        if session.needs_refresh(Utc::now()) {
            if session.is_anonymous() {
                log::info!("Logging in to the target API");
            } else {
                log::info!("Target token expired, logging in again");
            }
            let token = self.login().await?;
            session.refresh(token, Utc::now());
        }
        session
            .token()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Authentication("no session token".into()))
    }

    async fn login(&self) -> ApiResult<String> {
        let body = serde_json::to_vec(&LoginRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            customer_name: self.credentials.customer_name.as_deref(),
        })
        .map_err(|e| ApiError::Config(e.to_string()))?;
        let url = self.url(LOGIN_PATH)?;

        let (url, body) = (&url, &body);
        let bytes = retry_with_backoff(&self.retry, "target login", move |_| async move {
            let response = match self
                .http
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => return ApiError::into_attempt(Err(classify_transport_error(&e))),
            };
            let status = response.status();
            if !status.is_success() {
                let error = match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        ApiError::Authentication(format!("target login rejected ({status})"))
                    }
                    _ => classify_status(status, response.headers()),
                };
                return ApiError::into_attempt(Err(error));
            }
            ApiError::into_attempt(response.bytes().await.map_err(|e| classify_transport_error(&e)))
        })
        .await
        .map_err(RetryError::into_inner)?;

        let login: LoginResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {e}")))?;
        Ok(login.token)
    }

    async fn attempt(&self, method: &Method, url: &Url, body: Option<&[u8]>) -> Attempt<Vec<u8>, CallError> {
        let token = match self.token().await {
            Ok(token) => token,
            Err(e) => return api_attempt(Err(e)),
        };

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTH_HEADER, token);
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return api_attempt(Err(classify_transport_error(&e))),
        };

        let status = response.status();
        if status.is_success() {
            return api_attempt(
                response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| classify_transport_error(&e)),
            );
        }

        match classify_status(status, response.headers()) {
            error @ ApiError::Authentication(_) => Attempt::Fatal(CallError::TokenRejected(error)),
            error => api_attempt(Err(error)),
        }
    }

    /// One request under the retry policy. A rejected token ends the loop at once.
    async fn send(
        &self,
        operation: &str,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
    ) -> Result<Vec<u8>, CallError> {
        retry_with_backoff(&self.retry, operation, move |_| self.attempt(method, url, body))
            .await
            .map_err(RetryError::into_inner)
    }

    /// Send a request; when the token is rejected, log in again and resend once.
    async fn call(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> ApiResult<Vec<u8>> {
        let url = self.url(path)?;
        let operation = format!("{method} {path}");
        let body = body.as_deref();

        match self.send(&operation, &method, &url, body).await {
            Err(CallError::TokenRejected(error)) => {
                log::info!("{operation}: target rejected the session token ({error}), logging in again");
                self.session.lock().await.invalidate();
                self.send(&operation, &method, &url, body)
                    .await
                    .map_err(CallError::into_api)
            }
            result => result.map_err(CallError::into_api),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let bytes = self.call(Method::GET, path, None).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidResponse(format!("GET {path}: {e}")))
    }

    async fn send_json<B: Serialize + Sync>(&self, method: Method, path: &str, body: &B) -> ApiResult<Vec<u8>> {
        let body = serde_json::to_vec(body).map_err(|e| ApiError::Config(e.to_string()))?;
        self.call(method, path, Some(body)).await
    }
}

/// Map a non-2xx target response onto [`ApiError`].
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap) -> ApiError {
    let detail = headers
        .get(STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| serde_json::from_str::<Vec<StatusDetail>>(raw).ok())
        .and_then(|details| details.into_iter().next());

    let key = detail.as_ref().and_then(|d| d.i18n_key.clone());
    let subject = detail.as_ref().and_then(|d| d.subject.clone());
    let message = key.clone().or_else(|| subject.clone()).unwrap_or_default();

    let conflict = status == StatusCode::CONFLICT
        || key.as_deref().is_some_and(|k| ALREADY_EXISTS_KEYS.contains(&k))
        || subject.as_deref() == Some("name");
    if conflict {
        return ApiError::AlreadyExists(message);
    }

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Authentication(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited("target".into()),
        _ => ApiError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TargetApi for TargetClient {
    async fn account_groups(&self) -> ApiResult<Vec<AccountGroup>> {
        let groups: Vec<AccountGroupWire> = self.get_json("/cloud/group").await?;
        Ok(groups
            .into_iter()
            .map(|g| AccountGroup {
                id: g.id,
                name: g.name,
                account_ids: g.account_ids,
            })
            .collect())
    }

    async fn cloud_accounts(&self) -> ApiResult<Vec<CloudAccount>> {
        let accounts: Vec<CloudAccountWire> = self.get_json("/cloud/name").await?;
        Ok(accounts
            .into_iter()
            .map(|a| CloudAccount {
                provider: a.cloud_type.as_deref().and_then(CloudProvider::parse),
                id: a.id,
                name: a.name,
            })
            .collect())
    }

    async fn policy_ids(&self) -> ApiResult<BTreeSet<String>> {
        let policies: Vec<PolicyWire> = self.get_json("/policy").await?;
        Ok(policies.into_iter().map(|p| p.policy_id).collect())
    }

    async fn user_roles(&self) -> ApiResult<Vec<NamedEntity>> {
        self.get_json("/user/role/name").await
    }

    async fn users(&self) -> ApiResult<Vec<String>> {
        let users: Vec<NamedEntity> = self.get_json("/user/name").await?;
        Ok(users.into_iter().map(|u| u.id).collect())
    }

    async fn alert_rules(&self) -> ApiResult<Vec<NamedEntity>> {
        let rules: Vec<AlertRuleWire> = self.get_json("/alert/rule").await?;
        Ok(rules
            .into_iter()
            .filter_map(|r| {
                Some(NamedEntity {
                    id: r.policy_scan_config_id?,
                    name: r.name,
                })
            })
            .collect())
    }

    async fn create_account_group(&self, request: &AccountGroupRequest) -> ApiResult<()> {
        match self.send_json(Method::POST, "/cloud/group", request).await {
            Err(ApiError::Status { status: 400, message }) if message == GROUP_NAME_TAKEN_KEY => {
                Err(ApiError::AlreadyExists(message))
            }
            result => result.map(drop),
        }
    }

    async fn update_account_group(&self, id: &str, request: &AccountGroupRequest) -> ApiResult<()> {
        self.send_json(Method::PUT, &format!("/cloud/group/{id}"), request)
            .await
            .map(drop)
    }

    async fn create_user_role(&self, request: &UserRoleRequest) -> ApiResult<()> {
        self.send_json(Method::POST, "/user/role", request).await.map(drop)
    }

    async fn update_user_role(&self, id: &str, request: &UserRoleRequest) -> ApiResult<()> {
        self.send_json(Method::PUT, &format!("/user/role/{id}"), request)
            .await
            .map(drop)
    }

    async fn create_user(&self, request: &UserRequest) -> ApiResult<()> {
        self.send_json(Method::POST, "/user", request).await.map(drop)
    }

    async fn update_user(&self, email: &str, request: &UserRequest) -> ApiResult<()> {
        self.send_json(Method::PUT, &format!("/user/{email}"), request)
            .await
            .map(drop)
    }

    async fn create_alert_rule(&self, request: &AlertRuleRequest) -> ApiResult<Option<String>> {
        let bytes = self.send_json(Method::POST, "/alert/rule", request).await?;
        Ok(serde_json::from_slice::<AlertRuleWire>(&bytes)
            .ok()
            .and_then(|rule| rule.policy_scan_config_id))
    }

    async fn update_alert_rule(&self, id: &str, request: &AlertRuleRequest) -> ApiResult<()> {
        self.send_json(Method::PUT, &format!("/alert/rule/{id}"), request)
            .await
            .map(drop)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_name: Option<&'a str>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusDetail {
    #[serde(default)]
    i18n_key: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountGroupWire {
    id: String,
    name: String,
    #[serde(default)]
    account_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudAccountWire {
    id: String,
    name: String,
    #[serde(default)]
    cloud_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyWire {
    policy_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertRuleWire {
    #[serde(default)]
    policy_scan_config_id: Option<String>,
    #[serde(default)]
    name: String,
}
