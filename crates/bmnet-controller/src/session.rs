//! Authenticated controller session.
//!
//! A [`ControllerSession`] owns the HTTP connection pool, the endpoint and
//! the authentication strategy. It is built once by the agent and shared by
//! `Arc` with every client. Keystone tokens are fetched on first use and kept
//! for the session's lifetime.

use bmnet_common::{NetError, NetResult};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Header carrying the token on controller requests.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header carrying the issued token on Keystone responses.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Default controller API port.
pub const DEFAULT_CONTROLLER_PORT: u16 = 9696;

/// Endpoint used when none is configured.
pub fn default_endpoint(my_ip: &str) -> String {
    format!("http://{}:{}", my_ip, DEFAULT_CONTROLLER_PORT)
}

/// Password credentials for Keystone v3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoneCredentials {
    /// Identity endpoint, e.g. `http://10.0.0.5:5000`
    pub auth_url: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// Project to scope the token to
    pub project_name: String,
    /// Domain of both user and project
    pub domain_name: String,
}

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// No token is sent
    NoAuth,
    /// A static, pre-issued token
    Token(String),
    /// Password authentication against Keystone
    Keystone(KeystoneCredentials),
}

/// Settings for [`ControllerSession::new`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Controller base URL
    pub endpoint: String,
    /// Authentication strategy
    pub auth: AuthStrategy,
    /// Per-request timeout
    pub timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Extra CA bundle (PEM)
    pub cafile: Option<PathBuf>,
}

impl SessionConfig {
    /// No-auth session against `endpoint` with a 30s timeout
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: AuthStrategy::NoAuth,
            timeout: Duration::from_secs(30),
            insecure: false,
            cafile: None,
        }
    }

    /// Builder: set the auth strategy
    pub fn with_auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = auth;
        self
    }
}

/// Shared, lazily authenticated connection to the controller.
#[derive(Debug)]
pub struct ControllerSession {
    http: Client,
    endpoint: String,
    auth: AuthStrategy,
    token: OnceCell<String>,
}

impl ControllerSession {
    /// Build the HTTP client and the session. No request is sent.
    pub fn new(config: SessionConfig) -> NetResult<Arc<Self>> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(path) = &config.cafile {
            let pem = std::fs::read(path).map_err(|e| {
                NetError::invalid(format!("cannot read CA file {}: {}", path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                NetError::invalid(format!("invalid CA file {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| NetError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Arc::new(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth: config.auth,
            token: OnceCell::new(),
        }))
    }

    /// Controller base URL without trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The pooled HTTP client
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Token for the next request, authenticating on first use.
    pub async fn token(&self) -> NetResult<Option<String>> {
        match &self.auth {
            AuthStrategy::NoAuth => Ok(None),
            AuthStrategy::Token(token) => Ok(Some(token.clone())),
            AuthStrategy::Keystone(creds) => {
                let token = self
                    .token
                    .get_or_try_init(|| self.fetch_keystone_token(creds))
                    .await?;
                Ok(Some(token.clone()))
            }
        }
    }

    async fn fetch_keystone_token(&self, creds: &KeystoneCredentials) -> NetResult<String> {
        let url = format!("{}/v3/auth/tokens", creds.auth_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": creds.username,
                            "domain": {"name": creds.domain_name},
                            "password": creds.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": creds.project_name,
                        "domain": {"name": creds.domain_name},
                    }
                }
            }
        });

        tracing::debug!(auth_url = %creds.auth_url, user = %creds.username, "Requesting controller token");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NetError::unavailable(format!("identity service unreachable: {}", e)))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => response
                .headers()
                .get(SUBJECT_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    NetError::unavailable("identity service returned no subject token")
                }),
            status => Err(NetError::unavailable(format!(
                "identity service refused credentials for {} (HTTP {})",
                creds.username, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        assert_eq!(default_endpoint("10.0.0.5"), "http://10.0.0.5:9696");
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let session = ControllerSession::new(SessionConfig::new("http://ctl:9696/")).unwrap();
        assert_eq!(session.endpoint(), "http://ctl:9696");
    }

    #[tokio::test]
    async fn test_static_token_strategies() {
        let noauth = ControllerSession::new(SessionConfig::new("http://ctl:9696")).unwrap();
        assert_eq!(noauth.token().await.unwrap(), None);

        let static_token = ControllerSession::new(
            SessionConfig::new("http://ctl:9696").with_auth(AuthStrategy::Token("abc".into())),
        )
        .unwrap();
        assert_eq!(static_token.token().await.unwrap(), Some("abc".to_string()));
    }

    #[test]
    fn test_missing_cafile_is_invalid() {
        let mut config = SessionConfig::new("https://ctl:9696");
        config.cafile = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(matches!(
            ControllerSession::new(config),
            Err(NetError::InvalidParameter { .. })
        ));
    }
}
