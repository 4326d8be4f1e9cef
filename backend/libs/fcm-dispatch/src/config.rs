use serde::{Deserialize, Serialize};

use crate::errors::FCMError;

pub const DEFAULT_V1_URL_PREFIX: &str = "https://fcm.googleapis.com/v1/projects/";
pub const DEFAULT_V1_URL_SUFFIX: &str = "/messages:send";
pub const DEFAULT_LEGACY_API_URL: &str = "https://fcm.googleapis.com/fcm/send";
pub const DEFAULT_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const DEFAULT_TOPIC_ADD_SUBSCRIPTION_URL: &str = "https://iid.googleapis.com/iid/v1:batchAdd";
pub const DEFAULT_TOPIC_REMOVE_SUBSCRIPTION_URL: &str =
    "https://iid.googleapis.com/iid/v1:batchRemove";
pub const DEFAULT_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Strategy for delivering one v1 message to several recipients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutStrategy {
    /// Bind all tokens to an ephemeral topic, send once, then unbind.
    #[default]
    TopicRelay,
    /// One request per recipient, in recipient order.
    Sequential,
}

/// Backend endpoint URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub v1_url_prefix: String,
    pub v1_url_suffix: String,
    pub legacy_url: String,
    pub token_url: String,
    pub topic_add_url: String,
    pub topic_remove_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            v1_url_prefix: DEFAULT_V1_URL_PREFIX.to_string(),
            v1_url_suffix: DEFAULT_V1_URL_SUFFIX.to_string(),
            legacy_url: DEFAULT_LEGACY_API_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            topic_add_url: DEFAULT_TOPIC_ADD_SUBSCRIPTION_URL.to_string(),
            topic_remove_url: DEFAULT_TOPIC_REMOVE_SUBSCRIPTION_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// `<prefix><project id><suffix>`
    pub fn v1_send_url(&self, project_id: &str) -> String {
        format!("{}{}{}", self.v1_url_prefix, project_id, self.v1_url_suffix)
    }
}

/// FCM client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcmConfig {
    /// Legacy server key
    pub api_key: Option<String>,
    /// OAuth2 bearer token for the v1 API
    pub access_token: Option<String>,
    pub project_id: Option<String>,
    /// Replaces the send endpoint when set
    pub proxy_url: Option<String>,
    pub endpoints: Endpoints,
    pub fanout: FanoutStrategy,
    /// OAuth scope requested by the signed assertion
    pub scope: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Flat view of `FCM_*` environment variables
#[derive(Debug, Deserialize)]
struct EnvConfig {
    api_key: Option<String>,
    access_token: Option<String>,
    project_id: Option<String>,
    proxy_url: Option<String>,
    #[serde(default)]
    fanout: FanoutStrategy,
    scope: Option<String>,
    request_timeout_secs: Option<u64>,
    token_url: Option<String>,
    legacy_url: Option<String>,
    v1_url_prefix: Option<String>,
    topic_add_url: Option<String>,
    topic_remove_url: Option<String>,
}

impl FcmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `FCM_*` environment variables (and `.env`).
    ///
    /// Recognized: `FCM_API_KEY`, `FCM_ACCESS_TOKEN`, `FCM_PROJECT_ID`,
    /// `FCM_PROXY_URL`, `FCM_FANOUT` (`topic_relay` | `sequential`),
    /// `FCM_SCOPE`, `FCM_REQUEST_TIMEOUT_SECS` and the endpoint overrides
    /// `FCM_TOKEN_URL`, `FCM_LEGACY_URL`, `FCM_V1_URL_PREFIX`,
    /// `FCM_TOPIC_ADD_URL`, `FCM_TOPIC_REMOVE_URL`.
    pub fn from_env() -> Result<Self, FCMError> {
        dotenvy::dotenv().ok();

        let env: EnvConfig = envy::prefixed("FCM_")
            .from_env()
            .map_err(|e| FCMError::Config(e.to_string()))?;

        Ok(Self::from(env))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_MESSAGING_SCOPE)
    }
}

impl From<EnvConfig> for FcmConfig {
    fn from(env: EnvConfig) -> Self {
        let defaults = Endpoints::default();
        Self {
            api_key: env.api_key.filter(|v| !v.is_empty()),
            access_token: env.access_token.filter(|v| !v.is_empty()),
            project_id: env.project_id.filter(|v| !v.is_empty()),
            proxy_url: env.proxy_url.filter(|v| !v.is_empty()),
            endpoints: Endpoints {
                v1_url_prefix: env.v1_url_prefix.unwrap_or(defaults.v1_url_prefix),
                v1_url_suffix: defaults.v1_url_suffix,
                legacy_url: env.legacy_url.unwrap_or(defaults.legacy_url),
                token_url: env.token_url.unwrap_or(defaults.token_url),
                topic_add_url: env.topic_add_url.unwrap_or(defaults.topic_add_url),
                topic_remove_url: env.topic_remove_url.unwrap_or(defaults.topic_remove_url),
            },
            fanout: env.fanout,
            scope: env.scope,
            request_timeout_secs: env.request_timeout_secs,
        }
    }
}
