use std::time::{Duration, Instant};

use {
    async_trait::async_trait,
    parley_channels::{Error, Result, TokenProvider},
    parley_common::retry::{RetryError, RetryPolicy, retry},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::config::MsTeamsConfig;

/// Tokens this close to expiry are refreshed.
const REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct CachedAccessToken {
    pub token: Secret<String>,
    pub expires_at: Instant,
}

impl CachedAccessToken {
    fn is_valid(&self) -> bool {
        self.expires_at > Instant::now() + REFRESH_SKEW
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Client-credentials token source for the Bot Connector API.
pub struct BotTokenProvider {
    http: reqwest::Client,
    config: MsTeamsConfig,
    retry: RetryPolicy,
    cache: Mutex<Option<CachedAccessToken>>,
}

impl BotTokenProvider {
    pub fn new(http: reqwest::Client, config: MsTeamsConfig) -> Self {
        Self {
            http,
            config,
            retry: RetryPolicy::exponential(3, Duration::from_millis(250), Duration::from_secs(2)),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_token(&self) -> Result<CachedAccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.app_id.as_str()),
            ("client_secret", self.config.app_password.expose_secret()),
            ("scope", self.config.oauth_scope.as_str()),
        ];

        let resp = self
            .http
            .post(self.config.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::external("token request", e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::external("token response", e))?;
        let ttl = body.expires_in.unwrap_or(3600).max(120);
        Ok(CachedAccessToken {
            token: Secret::new(body.access_token),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }
}

#[async_trait]
impl TokenProvider for BotTokenProvider {
    async fn bearer_token(&self) -> Result<Secret<String>> {
        // Held across the request so concurrent callers share one refresh.
        let mut guard = self.cache.lock().await;
        if let Some(token) = guard.as_ref()
            && token.is_valid()
        {
            return Ok(token.token.clone());
        }

        debug!(tenant = %self.config.oauth_tenant, "requesting Bot Framework token");
        let fetched = retry(
            &self.retry,
            &CancellationToken::new(),
            "bot token",
            |_| self.request_token(),
        )
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Cancelled => Error::unavailable("token request cancelled"),
        })?;

        let token = fetched.token.clone();
        *guard = Some(fetched);
        Ok(token)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn provider(server: &mockito::Server) -> BotTokenProvider {
        let config = MsTeamsConfig {
            app_id: "bot-app".into(),
            app_password: Secret::new("hunter2".into()),
            login_endpoint: server.url(),
            ..Default::default()
        };
        BotTokenProvider::new(reqwest::Client::new(), config)
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn token_is_cached_until_near_expiry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botframework.com/oauth2/v2.0/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "bot-app".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let tokens = provider(&server);
        assert_eq!(tokens.bearer_token().await.unwrap().expose_secret(), "tok-1");
        assert_eq!(tokens.bearer_token().await.unwrap().expose_secret(), "tok-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_request_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/botframework.com/oauth2/v2.0/token")
            .with_status(503)
            .with_body("busy")
            .expect(2)
            .create_async()
            .await;

        let err = provider(&server).bearer_token().await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
        failing.assert_async().await;
    }
}
