use crate::config::AuthConfig;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Reasons a caller is not authorized
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization Failed status_code={0}")]
    Rejected(u16),

    #[error("Authorization Failed:{0}")]
    Unavailable(String),
}

/// Gate every request passes before touching storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check the caller's session cookie header.
    async fn authorize(&self, session_cookie: Option<String>) -> Result<(), AuthError>;
}

/// Authorizer backed by the validate-user microservice
pub struct HttpAuthorizer {
    client: reqwest::Client,
    validate_url: String,
}

impl HttpAuthorizer {
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            validate_url: format!("{}/msapi/validateuser", config.base_url()),
        })
    }

    pub fn validate_url(&self) -> &str {
        &self.validate_url
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(&self, session_cookie: Option<String>) -> Result<(), AuthError> {
        let mut request = self.client.get(&self.validate_url);
        if let Some(cookie) = session_cookie {
            request = request.header(COOKIE, cookie);
        }

        // Timeouts land here too and are not retried
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Validate-user response");

        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(AuthError::Rejected(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode as AxumStatus, routing::get, Router};
    use std::time::Duration;

    async fn spawn_validate_user(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn authorizer_for(base_url: String, timeout_secs: u64) -> HttpAuthorizer {
        HttpAuthorizer::new(&AuthConfig {
            validate_user_url: Some(base_url),
            timeout_secs,
            ..Default::default()
        })
        .unwrap()
    }

    async fn require_session(headers: HeaderMap) -> AxumStatus {
        match headers.get("cookie").and_then(|v| v.to_str().ok()) {
            Some(cookie) if cookie.contains("token=valid") => AxumStatus::OK,
            _ => AxumStatus::UNAUTHORIZED,
        }
    }

    #[tokio::test]
    async fn test_forwards_cookie_and_accepts_ok() {
        let base = spawn_validate_user(
            Router::new().route("/msapi/validateuser", get(require_session)),
        )
        .await;
        let authorizer = authorizer_for(base, 5);

        assert!(authorizer
            .authorize(Some("token=valid; other=1".to_string()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_non_ok_status_is_rejected() {
        let base = spawn_validate_user(
            Router::new().route("/msapi/validateuser", get(require_session)),
        )
        .await;
        let authorizer = authorizer_for(base, 5);

        let err = authorizer.authorize(None).await.unwrap_err();
        assert_eq!(err, AuthError::Rejected(401));
        assert_eq!(err.to_string(), "Authorization Failed status_code=401");
    }

    #[tokio::test]
    async fn test_timeout_is_authorization_failure() {
        let base = spawn_validate_user(Router::new().route(
            "/msapi/validateuser",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                AxumStatus::OK
            }),
        ))
        .await;
        let authorizer = authorizer_for(base, 1);

        let err = authorizer.authorize(None).await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_authorization_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let authorizer = authorizer_for(format!("http://{}", addr), 2);
        let err = authorizer.authorize(None).await.unwrap_err();
        assert!(err.to_string().starts_with("Authorization Failed:"));
    }

    #[test]
    fn test_validate_url() {
        let authorizer = authorizer_for("http://ms-validate-user:80/".to_string(), 5);
        assert_eq!(
            authorizer.validate_url(),
            "http://ms-validate-user:80/msapi/validateuser"
        );
    }
}
