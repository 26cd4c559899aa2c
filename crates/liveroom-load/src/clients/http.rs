//! JSON/HTTP implementations of the capability interfaces.
//!
//! Both clients send the caller's token as a bearer header, apply a per-request
//! timeout, and sanitize any error body before it is stored in an error so
//! that tokens echoed back by the service never reach the logs.

use super::{
    CreateSessionRequest, IdentityProvider, Profile, RoomAction, SessionClient, StateSnapshot,
};
use crate::accounts::{Identity, Login, Role};
use crate::errors::RpcError;
use async_trait::async_trait;
use common::secret::{bearer, ExposeSecret, SecretString};
use common::types::{SessionId, UserId};
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum length for error body in error messages.
const MAX_ERROR_BODY_LEN: usize = 256;

/// JWT tokens (header.payload.signature).
#[allow(clippy::expect_used)]
static JWT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]*)?")
        .expect("static JWT pattern compiles")
});

/// Bearer tokens of any shape.
#[allow(clippy::expect_used)]
static BEARER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("static bearer pattern compiles")
});

/// Remove bearer tokens and JWTs from an error body and cap its length.
pub fn sanitize_error_body(body: &str) -> String {
    let sanitized = BEARER_PATTERN.replace_all(body, "[BEARER_REDACTED]");
    let sanitized = JWT_PATTERN.replace_all(&sanitized, "[JWT_REDACTED]");

    if sanitized.chars().count() > MAX_ERROR_BODY_LEN {
        let truncated: String = sanitized.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{truncated}...[truncated]")
    } else {
        sanitized.into_owned()
    }
}

fn transport(err: &reqwest::Error) -> RpcError {
    if err.is_decode() {
        RpcError::Unexpected(format!("undecodable response body: {err}"))
    } else {
        RpcError::Transport(err.to_string())
    }
}

fn build_client(timeout: Duration) -> Result<Client, RpcError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RpcError::Transport(format!("Failed to create HTTP client: {e}")))
}

async fn send(request: RequestBuilder) -> Result<Response, RpcError> {
    let response = request.send().await.map_err(|e| transport(&e))?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RpcError::Rejected {
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        });
    }

    Ok(response)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RpcError> {
    send(request).await?.json().await.map_err(|e| transport(&e))
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    login: &'a str,
    password: &'a str,
    role: Role,
}

#[derive(Deserialize)]
struct SignInResponse {
    user_id: UserId,
    id_token: SecretString,
}

#[derive(Deserialize)]
struct ExchangeTokenResponse {
    token: SecretString,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

/// Identity service client.
pub struct HttpIdentityProvider {
    base_url: String,
    http_client: Client,
}

impl HttpIdentityProvider {
    /// Create a new identity client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            base_url: base_url.into(),
            http_client: build_client(timeout)?,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_in(&self, login: &Login, role: Role) -> Result<Identity, RpcError> {
        let url = format!("{}/v1/auth/sign-in", self.base_url);
        let body = SignInRequest {
            login: &login.login,
            password: login.password.expose_secret(),
            role,
        };

        let response: SignInResponse = send_json(self.http_client.post(&url).json(&body)).await?;
        Ok(Identity {
            id: response.user_id,
            credential: response.id_token,
            role,
        })
    }

    async fn exchange_token(&self, identity: &Identity) -> Result<SecretString, RpcError> {
        let url = format!("{}/v1/auth/exchange-token", self.base_url);
        let request = self
            .http_client
            .post(&url)
            .header("Authorization", bearer(&identity.credential));

        let response: ExchangeTokenResponse = send_json(request).await?;
        Ok(response.token)
    }
}

/// Session service client.
pub struct HttpSessionClient {
    base_url: String,
    http_client: Client,
}

impl HttpSessionClient {
    /// Create a new session client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            base_url: base_url.into(),
            http_client: build_client(timeout)?,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, token: &SecretString, path: &str) -> RequestBuilder {
        self.http_client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", bearer(token))
    }

    fn post(&self, token: &SecretString, path: &str) -> RequestBuilder {
        self.http_client
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", bearer(token))
    }

    async fn list<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        path: &str,
    ) -> Result<Vec<T>, RpcError> {
        let response: ListResponse<T> = send_json(self.get(token, path)).await?;
        Ok(response.items)
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn create_session(
        &self,
        token: &SecretString,
        request: &CreateSessionRequest,
    ) -> Result<SessionId, RpcError> {
        let response: CreateSessionResponse =
            send_json(self.post(token, "/v1/sessions").json(request)).await?;
        Ok(response.session_id)
    }

    async fn get_profile(&self, token: &SecretString) -> Result<Profile, RpcError> {
        send_json(self.get(token, "/v1/me")).await
    }

    async fn list_locations(&self, token: &SecretString) -> Result<Vec<String>, RpcError> {
        self.list(token, "/v1/locations").await
    }

    async fn list_courses(&self, token: &SecretString) -> Result<Vec<String>, RpcError> {
        self.list(token, "/v1/courses").await
    }

    async fn list_sessions(
        &self,
        token: &SecretString,
        course_id: &str,
    ) -> Result<Vec<SessionId>, RpcError> {
        self.list(token, &format!("/v1/courses/{course_id}/sessions"))
            .await
    }

    async fn list_participants(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<Vec<UserId>, RpcError> {
        self.list(token, &format!("/v1/sessions/{session}/participants"))
            .await
    }

    async fn list_materials(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<Vec<String>, RpcError> {
        self.list(token, &format!("/v1/sessions/{session}/materials"))
            .await
    }

    async fn join(&self, token: &SecretString, session: &SessionId) -> Result<(), RpcError> {
        send(self.post(token, &format!("/v1/sessions/{session}/join")))
            .await
            .map(|_| ())
    }

    async fn fetch_state(
        &self,
        token: &SecretString,
        session: &SessionId,
    ) -> Result<StateSnapshot, RpcError> {
        send_json(self.get(token, &format!("/v1/sessions/{session}/state"))).await
    }

    async fn refresh(&self, token: &SecretString, session: &SessionId) -> Result<(), RpcError> {
        send(self.post(token, &format!("/v1/sessions/{session}/refresh")))
            .await
            .map(|_| ())
    }

    async fn perform(
        &self,
        token: &SecretString,
        session: &SessionId,
        action: &RoomAction,
    ) -> Result<(), RpcError> {
        send(
            self.post(token, &format!("/v1/sessions/{session}/actions"))
                .json(action),
        )
        .await
        .map(|_| ())
    }
}
