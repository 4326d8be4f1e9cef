use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{FanoutStrategy, FcmConfig};
use crate::errors::FCMError;
use crate::fanout::{process_topic_subscription, FanoutCoordinator};
use crate::models::{BearerToken, Credentials, Message, SendReport, ServiceAccountKey};
use crate::request::{build_send_request, ApiVersion};
use crate::token::acquire_token;
use crate::transport::{ReqwestTransport, Transport, TransportResponse};

/// Firebase Cloud Messaging Client
///
/// Owns the configuration and the active credential, and turns a
/// [`Message`] into one or more backend requests. Configuration changes take
/// `&mut self`, so they cannot overlap an in-flight send.
pub struct FCMClient {
    config: FcmConfig,
    bearer: Option<BearerToken>,
    transport: Arc<dyn Transport>,
}

impl FCMClient {
    /// Create a client using the default reqwest transport.
    pub fn new(config: FcmConfig) -> Result<Self, FCMError> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client on top of a caller-supplied transport.
    pub fn with_transport(config: FcmConfig, transport: Arc<dyn Transport>) -> Self {
        let bearer = config.access_token.clone().map(BearerToken::new);
        Self {
            config,
            bearer,
            transport,
        }
    }

    pub fn from_env() -> Result<Self, FCMError> {
        Self::new(FcmConfig::from_env()?)
    }

    pub fn config(&self) -> &FcmConfig {
        &self.config
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) -> &mut Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    /// Use an externally obtained bearer token, treated as issued now.
    pub fn set_access_token(&mut self, access_token: impl Into<String>) -> &mut Self {
        self.set_bearer(BearerToken::new(access_token));
        self
    }

    pub fn set_project_id(&mut self, project_id: impl Into<String>) -> &mut Self {
        self.config.project_id = Some(project_id.into());
        self
    }

    pub fn set_proxy_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.config.proxy_url = Some(url.into());
        self
    }

    pub fn set_fanout_strategy(&mut self, strategy: FanoutStrategy) -> &mut Self {
        self.config.fanout = strategy;
        self
    }

    fn set_bearer(&mut self, token: BearerToken) {
        self.config.access_token = Some(token.access_token.clone());
        self.bearer = Some(token);
    }

    /// Active credential; a bearer token wins over the server key.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.bearer {
            return Some(Credentials::Bearer(token.clone()));
        }
        self.config.api_key.clone().map(Credentials::ApiKey)
    }

    /// Credential for topic batchAdd / batchRemove calls. The instance-id
    /// API takes the server key when one is set, the bearer token otherwise.
    pub fn subscription_credentials(&self) -> Option<Credentials> {
        if let Some(key) = &self.config.api_key {
            return Some(Credentials::ApiKey(key.clone()));
        }
        self.bearer.clone().map(Credentials::Bearer)
    }

    /// True when a bearer token is held and its one-hour window has passed.
    pub fn access_token_expired(&self) -> bool {
        self.bearer.as_ref().is_some_and(BearerToken::is_expired)
    }

    fn require_credentials(&self) -> Result<Credentials, FCMError> {
        let credentials = self.credentials().ok_or(FCMError::MissingCredentials)?;
        if let Credentials::Bearer(token) = &credentials {
            if token.is_expired() {
                warn!(
                    expired_at = %token.expires_at(),
                    "Sending with an expired access token, fetch a new one first"
                );
            }
        }
        Ok(credentials)
    }

    /// Exchange a signed assertion for a bearer token and make it active.
    pub async fn fetch_access_token(
        &mut self,
        issuer: &str,
        private_key: &[u8],
    ) -> Result<BearerToken, FCMError> {
        let token_url = self.config.endpoints.token_url.clone();
        self.fetch_access_token_from(&token_url, issuer, private_key)
            .await
    }

    async fn fetch_access_token_from(
        &mut self,
        token_url: &str,
        issuer: &str,
        private_key: &[u8],
    ) -> Result<BearerToken, FCMError> {
        let token = acquire_token(
            self.transport.as_ref(),
            token_url,
            issuer,
            private_key,
            self.config.scope(),
        )
        .await?;

        self.set_bearer(token.clone());
        Ok(token)
    }

    /// Fetch a token for a service account and adopt its project id when
    /// none is configured. The key's `token_uri` wins over the configured
    /// token endpoint when present.
    pub async fn fetch_access_token_with(
        &mut self,
        key: &ServiceAccountKey,
    ) -> Result<BearerToken, FCMError> {
        let token_url = if key.token_uri.is_empty() {
            self.config.endpoints.token_url.clone()
        } else {
            key.token_uri.clone()
        };
        let token = self
            .fetch_access_token_from(&token_url, &key.client_email, key.private_key.as_bytes())
            .await?;

        if self.config.project_id.is_none() && !key.project_id.is_empty() {
            self.config.project_id = Some(key.project_id.clone());
        }
        Ok(token)
    }

    /// Send a notification.
    ///
    /// Backend rejections come back inside the report, not as errors. The
    /// caller's message is never modified.
    pub async fn send(&self, message: &Message) -> Result<SendReport, FCMError> {
        let credentials = self.require_credentials()?;
        let recipients = message.recipients().len();

        if recipients == 0 {
            return Err(FCMError::InvalidMessage(
                "message has no recipients".to_string(),
            ));
        }

        let api = ApiVersion::for_credentials(&credentials);
        info!(recipients, api = ?api, "Sending FCM message");

        if recipients > 1 && api == ApiVersion::V1 {
            let subscription_credentials = self
                .subscription_credentials()
                .unwrap_or_else(|| credentials.clone());
            let coordinator = FanoutCoordinator {
                transport: self.transport.as_ref(),
                credentials: &credentials,
                subscription_credentials: &subscription_credentials,
                config: &self.config,
            };
            return coordinator.deliver(message).await;
        }

        let request = build_send_request(message, &credentials, &self.config)?;
        let response = self.transport.post(request).await?;
        if !response.is_success() {
            warn!(status = response.status, "FCM rejected message");
        }

        Ok(SendReport::direct(response))
    }

    /// Subscribe one or more registration tokens to `topic`.
    pub async fn add_subscription<I, T>(
        &self,
        topic: &str,
        tokens: I,
    ) -> Result<TransportResponse, FCMError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let credentials = self
            .subscription_credentials()
            .ok_or(FCMError::MissingCredentials)?;
        process_topic_subscription(
            self.transport.as_ref(),
            &credentials,
            topic,
            tokens.into_iter().map(Into::into).collect(),
            &self.config.endpoints.topic_add_url,
        )
        .await
    }

    /// Unsubscribe one or more registration tokens from `topic`.
    pub async fn remove_subscription<I, T>(
        &self,
        topic: &str,
        tokens: I,
    ) -> Result<TransportResponse, FCMError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let credentials = self
            .subscription_credentials()
            .ok_or(FCMError::MissingCredentials)?;
        process_topic_subscription(
            self.transport.as_ref(),
            &credentials,
            topic,
            tokens.into_iter().map(Into::into).collect(),
            &self.config.endpoints.topic_remove_url,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn client(config: FcmConfig) -> FCMClient {
        FCMClient::with_transport(config, Arc::new(ReqwestTransport::default()))
    }

    #[test]
    fn test_fcm_client_creation() {
        let config = FcmConfig {
            project_id: Some("test-project".to_string()),
            ..Default::default()
        };

        let client = FCMClient::new(config).unwrap();
        assert_eq!(client.config().project_id.as_deref(), Some("test-project"));
        assert!(client.credentials().is_none());
    }

    #[test]
    fn test_setters_chain() {
        let mut client = client(FcmConfig::default());
        client
            .set_api_key("server-key")
            .set_project_id("demo")
            .set_proxy_url("https://proxy.internal/send")
            .set_fanout_strategy(FanoutStrategy::Sequential);

        let config = client.config();
        assert_eq!(config.api_key.as_deref(), Some("server-key"));
        assert_eq!(config.project_id.as_deref(), Some("demo"));
        assert_eq!(config.proxy_url.as_deref(), Some("https://proxy.internal/send"));
        assert_eq!(config.fanout, FanoutStrategy::Sequential);
        assert_eq!(
            client.credentials(),
            Some(Credentials::ApiKey("server-key".to_string()))
        );
    }

    #[test]
    fn test_bearer_token_preferred_over_api_key() {
        let mut client = client(FcmConfig::default());
        client.set_api_key("server-key").set_access_token("ya29.abc");

        match client.credentials() {
            Some(Credentials::Bearer(token)) => assert_eq!(token.access_token, "ya29.abc"),
            other => panic!("unexpected credentials: {other:?}"),
        }
        assert_eq!(client.config().access_token.as_deref(), Some("ya29.abc"));
        assert!(!client.access_token_expired());
    }

    #[test]
    fn test_subscription_credentials_prefer_api_key() {
        let mut client = client(FcmConfig::default());
        client.set_access_token("ya29.abc");
        assert!(matches!(
            client.subscription_credentials(),
            Some(Credentials::Bearer(_))
        ));

        client.set_api_key("server-key");
        assert_eq!(
            client.subscription_credentials(),
            Some(Credentials::ApiKey("server-key".to_string()))
        );
        assert!(matches!(client.credentials(), Some(Credentials::Bearer(_))));
    }

    #[test]
    fn test_access_token_expiry_is_reported() {
        let mut client = client(FcmConfig::default());
        client.set_bearer(BearerToken::issued_at(
            "ya29.old",
            Utc::now() - Duration::hours(2),
        ));
        assert!(client.access_token_expired());
    }

    #[tokio::test]
    async fn test_send_without_credentials() {
        let client = client(FcmConfig::default());
        let message = Message::new().add_recipient(crate::models::Recipient::device("tok1"));

        let result = client.send(&message).await;
        assert!(matches!(result, Err(FCMError::MissingCredentials)));
    }
}
