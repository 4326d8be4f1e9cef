use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FCMError;
use crate::transport::TransportResponse;

/// Bearer tokens issued by the token endpoint are valid for one hour.
pub const BEARER_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Anything that can be addressed by a single FCM send.
pub trait AddressTarget {
    /// Raw target string: a registration token or a topic name.
    fn address_target(&self) -> &str;
}

/// A single device, addressed by its FCM registration token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    token: String,
}

impl Device {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl AddressTarget for Device {
    fn address_target(&self) -> &str {
        &self.token
    }
}

/// A backend-side topic group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    name: String,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AddressTarget for Topic {
    fn address_target(&self) -> &str {
        &self.name
    }
}

/// Message recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    Device(Device),
    Topic(Topic),
}

impl Recipient {
    pub fn device(token: impl Into<String>) -> Self {
        Recipient::Device(Device::new(token))
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Recipient::Topic(Topic::new(name))
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Recipient::Device(_))
    }

    /// Target as written in the legacy `to` field (`/topics/<name>` for topics).
    pub fn legacy_target(&self) -> String {
        match self {
            Recipient::Device(device) => device.token().to_string(),
            Recipient::Topic(topic) => format!("/topics/{}", topic.name()),
        }
    }
}

impl AddressTarget for Recipient {
    fn address_target(&self) -> &str {
        match self {
            Recipient::Device(device) => device.address_target(),
            Recipient::Topic(topic) => topic.address_target(),
        }
    }
}

/// Delivery priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// FCM Notification Payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Logical notification: payload plus an ordered set of recipients.
///
/// The dispatcher only borrows a `Message`; fan-out works on its own copy,
/// so the recipient list seen by the caller never changes during a send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    recipients: Vec<Recipient>,
    pub notification: Option<Notification>,
    pub data: BTreeMap<String, String>,
    pub priority: Priority,
    pub collapse_key: Option<String>,
    /// Seconds the backend keeps the message while the device is offline.
    pub time_to_live: Option<u32>,
    pub content_available: bool,
    pub mutable_content: bool,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn add_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = Recipient>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_collapse_key(mut self, collapse_key: impl Into<String>) -> Self {
        self.collapse_key = Some(collapse_key.into());
        self
    }

    pub fn with_time_to_live(mut self, seconds: u32) -> Self {
        self.time_to_live = Some(seconds);
        self
    }

    pub fn with_content_available(mut self, enabled: bool) -> Self {
        self.content_available = enabled;
        self
    }

    pub fn with_mutable_content(mut self, enabled: bool) -> Self {
        self.mutable_content = enabled;
        self
    }

    /// Registration tokens of all device recipients, in order.
    pub fn device_tokens(&self) -> Vec<String> {
        self.recipients
            .iter()
            .filter_map(|r| match r {
                Recipient::Device(device) => Some(device.token().to_string()),
                Recipient::Topic(_) => None,
            })
            .collect()
    }

    /// Copy of this message addressed to `recipient` alone.
    pub fn retarget(&self, recipient: Recipient) -> Self {
        Self {
            recipients: vec![recipient],
            ..self.clone()
        }
    }
}

/// Short-lived OAuth2 access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::issued_at(access_token, Utc::now())
    }

    pub fn issued_at(access_token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            issued_at,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(BEARER_TOKEN_LIFETIME_SECS)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Credential used to authorize a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Legacy server key, sent as `Authorization: key=<api key>`.
    ApiKey(String),
    /// OAuth2 token, sent as `Authorization: Bearer <token>`.
    Bearer(BearerToken),
}

impl Credentials {
    pub fn authorization_header(&self) -> String {
        match self {
            Credentials::ApiKey(key) => format!("key={}", key),
            Credentials::Bearer(token) => format!("Bearer {}", token.access_token),
        }
    }
}

/// Firebase Service Account Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    #[serde(default)]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Parse a service account JSON document as downloaded from the console.
    pub fn from_json(json: &str) -> Result<Self, FCMError> {
        serde_json::from_str(json)
            .map_err(|e| FCMError::Config(format!("invalid service account key: {}", e)))
    }
}

/// JWT Claims for Google OAuth2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Google OAuth2 Token Response
#[derive(Debug, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// FCM v1 Message Request
#[derive(Debug, Serialize)]
pub struct FcmMessage {
    pub message: FcmMessageContent,
}

/// FCM v1 Message Content
#[derive(Debug, Serialize)]
pub struct FcmMessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<serde_json::Value>,
}

/// Android-specific delivery options of the v1 API
#[derive(Debug, Serialize)]
pub struct AndroidConfig {
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Flat request body of the legacy `fcm/send` API
#[derive(Debug, Default, Serialize)]
pub struct LegacyMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub content_available: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mutable_content: bool,
}

/// Body of the instance-id batchAdd / batchRemove calls
#[derive(Debug, Serialize, Deserialize)]
pub struct TopicSubscriptionRequest {
    pub to: String,
    pub registration_tokens: Vec<String>,
}

/// How a multi-recipient send reached its recipients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPath {
    /// One request addressed a single recipient (or a legacy batch).
    Direct,
    /// Recipients were bound to an ephemeral topic which received one send.
    TopicRelay { topic: String },
    /// One request per recipient, in order.
    Sequential,
}

/// Outcome of one per-recipient request on the sequential path
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipient: Recipient,
    pub response: TransportResponse,
}

/// Result of `FCMClient::send`
#[derive(Debug)]
pub struct SendReport {
    /// Terminal response: the delivery response, the failing
    /// add-subscription response, or the last sequential response.
    pub response: TransportResponse,
    pub path: DeliveryPath,
    /// Every per-recipient outcome on the sequential path; empty otherwise.
    pub deliveries: Vec<Delivery>,
    /// Set when ephemeral topic teardown failed after a successful delivery.
    pub teardown_warning: Option<FCMError>,
}

impl SendReport {
    pub fn direct(response: TransportResponse) -> Self {
        Self {
            response,
            path: DeliveryPath::Direct,
            deliveries: Vec::new(),
            teardown_warning: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn is_success(&self) -> bool {
        self.response.is_success()
    }

    /// Recipients whose per-recipient request did not return 200.
    pub fn failed_recipients(&self) -> Vec<&Recipient> {
        self.deliveries
            .iter()
            .filter(|d| !d.response.is_success())
            .map(|d| &d.recipient)
            .collect()
    }
}
