// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firehose access tokens.

use crate::config::NozzleConfig;
use reqwest::Url;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors obtaining a token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid UAA URL '{0}'")]
    InvalidUrl(String),

    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("UAA returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Source of the credential presented when opening the firehose.
pub trait TokenFetcher: Send + Sync {
    /// Fetch a token of the form `"<type> <token>"`.
    fn fetch_token(&self) -> impl Future<Output = Result<String, AuthError>> + Send;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

/// OAuth2 client-credentials grant against a UAA server.
#[derive(Debug, Clone)]
pub struct UaaTokenFetcher {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl UaaTokenFetcher {
    pub fn from_config(config: &NozzleConfig) -> Result<Self, AuthError> {
        let invalid = || AuthError::InvalidUrl(config.uaa_url.clone());
        let mut token_url = Url::parse(&config.uaa_url).map_err(|_| invalid())?;
        token_url
            .path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["oauth", "token"]);

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_ssl_skip_verify)
            .timeout(TOKEN_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            token_url,
            client_id: config.username.clone(),
            client_secret: config.password.clone(),
        })
    }
}

impl TokenFetcher for UaaTokenFetcher {
    async fn fetch_token(&self) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(AuthError::Rejected("empty access token".into()));
        }
        tracing::debug!("Fetched {} token from {}", token.token_type, self.token_url);
        Ok(format!("{} {}", token.token_type, token.access_token))
    }
}

/// Fixed token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub String);

impl TokenFetcher for StaticToken {
    async fn fetch_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(uaa_url: String) -> NozzleConfig {
        NozzleConfig {
            uaa_url,
            username: "admin".to_string(),
            password: "admin-secret".to_string(),
            ..NozzleConfig::default()
        }
    }

    async fn serve_token(listener: TcpListener, status_line: &'static str, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&raw).contains("grant_type=client_credentials") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        let response = format!(
            "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8(raw).unwrap()
    }

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken("bearer 123456789".to_string());
        assert_eq!(token.fetch_token().await.unwrap(), "bearer 123456789");
    }

    #[test]
    fn test_invalid_uaa_url() {
        assert!(matches!(
            UaaTokenFetcher::from_config(&config("not a url".to_string())),
            Err(AuthError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_token(
            listener,
            "HTTP/1.1 200 OK",
            r#"{"access_token":"123456789","token_type":"bearer","expires_in":599}"#,
        ));

        let fetcher = UaaTokenFetcher::from_config(&config(format!("http://{}", addr))).unwrap();
        assert_eq!(fetcher.fetch_token().await.unwrap(), "bearer 123456789");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /oauth/token HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: basic "));
    }

    #[tokio::test]
    async fn test_unauthorized_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_token(
            listener,
            "HTTP/1.1 401 Unauthorized",
            r#"{"error":"unauthorized"}"#,
        ));

        let fetcher = UaaTokenFetcher::from_config(&config(format!("http://{}", addr))).unwrap();
        assert!(matches!(
            fetcher.fetch_token().await,
            Err(AuthError::Status { status: 401, .. })
        ));
    }
}
