use tracing::debug;

use crate::config::FcmConfig;
use crate::errors::FCMError;
use crate::models::{
    AddressTarget, AndroidConfig, Credentials, FcmMessage, FcmMessageContent, LegacyMessage,
    Message, Recipient, TopicSubscriptionRequest,
};
use crate::transport::TransportRequest;

/// Wire format of the send endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// `projects/{id}/messages:send`, one target per call
    V1,
    /// `fcm/send`, accepts batches of registration ids
    Legacy,
}

impl ApiVersion {
    /// Bearer credentials select the v1 API, server keys the legacy one.
    pub fn for_credentials(credentials: &Credentials) -> Self {
        match credentials {
            Credentials::Bearer(_) => ApiVersion::V1,
            Credentials::ApiKey(_) => ApiVersion::Legacy,
        }
    }
}

/// Resolve the send URL: proxy first, then the endpoint for the API version.
pub fn send_url(credentials: &Credentials, config: &FcmConfig) -> Result<String, FCMError> {
    if let Some(proxy) = config.proxy_url.as_deref() {
        return Ok(proxy.to_string());
    }

    match ApiVersion::for_credentials(credentials) {
        ApiVersion::V1 => {
            let project_id = config
                .project_id
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    FCMError::Config("project id is required for the v1 send endpoint".to_string())
                })?;
            Ok(config.endpoints.v1_send_url(project_id))
        }
        ApiVersion::Legacy => Ok(config.endpoints.legacy_url.clone()),
    }
}

/// Build the HTTP request delivering `message`.
///
/// On the v1 API the message must carry exactly one recipient; fan-out is
/// the dispatcher's job.
pub fn build_send_request(
    message: &Message,
    credentials: &Credentials,
    config: &FcmConfig,
) -> Result<TransportRequest, FCMError> {
    let url = send_url(credentials, config)?;

    let body = match ApiVersion::for_credentials(credentials) {
        ApiVersion::V1 => serde_json::to_vec(&v1_body(message)?)?,
        ApiVersion::Legacy => serde_json::to_vec(&legacy_body(message)?)?,
    };

    debug!(url = %url, recipients = message.recipients().len(), "Built send request");

    Ok(TransportRequest::new(url)
        .header("Authorization", credentials.authorization_header())
        .header("Content-Type", "application/json")
        .body(body))
}

/// `{"message": {...}}` envelope for a single-recipient v1 send.
pub fn v1_body(message: &Message) -> Result<FcmMessage, FCMError> {
    let recipient = match message.recipients() {
        [recipient] => recipient,
        [] => return Err(FCMError::InvalidMessage("message has no recipients".to_string())),
        many => {
            return Err(FCMError::InvalidMessage(format!(
                "v1 send accepts exactly one recipient, got {}",
                many.len()
            )))
        }
    };

    let (token, topic) = match recipient {
        Recipient::Device(device) => (Some(device.token().to_string()), None),
        Recipient::Topic(topic) => (None, Some(topic.name().to_string())),
    };

    let apns = if message.content_available || message.mutable_content {
        let mut aps = serde_json::Map::new();
        if message.content_available {
            aps.insert("content-available".to_string(), 1.into());
        }
        if message.mutable_content {
            aps.insert("mutable-content".to_string(), 1.into());
        }
        Some(serde_json::json!({ "payload": { "aps": aps } }))
    } else {
        None
    };

    Ok(FcmMessage {
        message: FcmMessageContent {
            token,
            topic,
            notification: message.notification.clone(),
            data: message.data.clone(),
            android: Some(AndroidConfig {
                priority: message.priority.as_str(),
                collapse_key: message.collapse_key.clone(),
                ttl: message.time_to_live.map(|secs| format!("{}s", secs)),
            }),
            apns,
        },
    })
}

/// FCM limits a topic condition to five topics.
pub const MAX_CONDITION_TOPICS: usize = 5;

/// Topic names are limited to `[a-zA-Z0-9-_.~%]+`.
pub fn is_valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'))
}

/// Flat legacy body. Several devices become `registration_ids`, several
/// topics become a `condition`; devices and topics cannot be mixed.
pub fn legacy_body(message: &Message) -> Result<LegacyMessage, FCMError> {
    let recipients = message.recipients();
    if recipients.is_empty() {
        return Err(FCMError::InvalidMessage("message has no recipients".to_string()));
    }

    let devices = recipients.iter().filter(|r| r.is_device()).count();
    if devices != 0 && devices != recipients.len() {
        return Err(FCMError::InvalidMessage(
            "mixing device and topic recipients is not supported".to_string(),
        ));
    }

    let mut body = LegacyMessage {
        notification: message.notification.clone(),
        data: message.data.clone(),
        priority: message.priority.as_str(),
        collapse_key: message.collapse_key.clone(),
        time_to_live: message.time_to_live,
        content_available: message.content_available,
        mutable_content: message.mutable_content,
        ..Default::default()
    };

    match recipients {
        [single] => body.to = Some(single.legacy_target()),
        _ if devices > 0 => body.registration_ids = Some(message.device_tokens()),
        topics => {
            if topics.len() > MAX_CONDITION_TOPICS {
                return Err(FCMError::InvalidMessage(format!(
                    "a topic condition accepts at most {} topics, got {}",
                    MAX_CONDITION_TOPICS,
                    topics.len()
                )));
            }
            if let Some(bad) = topics
                .iter()
                .map(Recipient::address_target)
                .find(|name| !is_valid_topic_name(name))
            {
                return Err(FCMError::InvalidMessage(format!(
                    "invalid topic name {:?}",
                    bad
                )));
            }

            let condition = topics
                .iter()
                .filter_map(|r| match r {
                    Recipient::Topic(topic) => Some(format!("'{}' in topics", topic.name())),
                    Recipient::Device(_) => None,
                })
                .collect::<Vec<_>>()
                .join(" || ");
            body.condition = Some(condition);
        }
    }

    Ok(body)
}

/// Build a batchAdd / batchRemove request binding `tokens` to `topic`.
///
/// Server keys are sent as `key=`; bearer tokens additionally need the
/// `access_token_auth` header on the instance-id API.
pub fn build_subscription_request(
    topic: &str,
    tokens: Vec<String>,
    url: &str,
    credentials: &Credentials,
) -> Result<TransportRequest, FCMError> {
    let body = TopicSubscriptionRequest {
        to: format!("/topics/{}", topic),
        registration_tokens: tokens,
    };

    let mut request = TransportRequest::new(url)
        .header("Authorization", credentials.authorization_header())
        .header("Content-Type", "application/json");
    if let Credentials::Bearer(_) = credentials {
        request = request.header("access_token_auth", "true");
    }

    Ok(request.body(serde_json::to_vec(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BearerToken, Notification, Priority};
    use serde_json::json;

    fn bearer() -> Credentials {
        Credentials::Bearer(BearerToken::new("ya29.token"))
    }

    fn api_key() -> Credentials {
        Credentials::ApiKey("server-key".to_string())
    }

    fn v1_config() -> FcmConfig {
        FcmConfig {
            project_id: Some("test-project".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_v1_single_device_request() {
        let message = Message::new()
            .add_recipient(Recipient::device("tok1"))
            .with_notification(Notification::new("Hi", "This is an FCM notification message!"))
            .with_priority(Priority::High);

        let request = build_send_request(&message, &bearer(), &v1_config()).unwrap();

        assert_eq!(
            request.url,
            "https://fcm.googleapis.com/v1/projects/test-project/messages:send"
        );
        assert_eq!(request.header_value("Authorization"), Some("Bearer ya29.token"));
        assert_eq!(request.header_value("Content-Type"), Some("application/json"));

        let body = request.body_json().unwrap();
        assert_eq!(body["message"]["token"], "tok1");
        assert!(body["message"].get("topic").is_none());
        assert_eq!(body["message"]["notification"]["title"], "Hi");
        assert_eq!(body["message"]["android"]["priority"], "high");
    }

    #[test]
    fn test_v1_topic_request() {
        let message = Message::new().add_recipient(Recipient::topic("news"));
        let body = build_send_request(&message, &bearer(), &v1_config())
            .unwrap()
            .body_json()
            .unwrap();

        assert_eq!(body["message"]["topic"], "news");
        assert!(body["message"].get("token").is_none());
    }

    #[test]
    fn test_v1_rejects_zero_or_many_recipients() {
        let empty = Message::new();
        assert!(matches!(
            build_send_request(&empty, &bearer(), &v1_config()),
            Err(FCMError::InvalidMessage(_))
        ));

        let many = Message::new()
            .add_recipient(Recipient::device("a"))
            .add_recipient(Recipient::device("b"));
        assert!(matches!(
            build_send_request(&many, &bearer(), &v1_config()),
            Err(FCMError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_v1_requires_project_id() {
        let message = Message::new().add_recipient(Recipient::device("tok1"));
        let result = build_send_request(&message, &bearer(), &FcmConfig::default());
        assert!(matches!(result, Err(FCMError::Config(_))));
    }

    #[test]
    fn test_proxy_url_overrides_endpoint() {
        let config = FcmConfig {
            proxy_url: Some("https://proxy.internal/fcm".to_string()),
            ..v1_config()
        };
        let message = Message::new().add_recipient(Recipient::device("tok1"));

        let request = build_send_request(&message, &api_key(), &config).unwrap();
        assert_eq!(request.url, "https://proxy.internal/fcm");
        assert_eq!(request.header_value("Authorization"), Some("key=server-key"));
    }

    #[test]
    fn test_v1_delivery_options() {
        let message = Message::new()
            .add_recipient(Recipient::device("tok1"))
            .with_data("order_id", "42")
            .with_collapse_key("orders")
            .with_time_to_live(600)
            .with_content_available(true);

        let body = serde_json::to_value(v1_body(&message).unwrap()).unwrap();
        assert_eq!(body["message"]["data"], json!({"order_id": "42"}));
        assert_eq!(body["message"]["android"]["collapse_key"], "orders");
        assert_eq!(body["message"]["android"]["ttl"], "600s");
        assert_eq!(body["message"]["apns"]["payload"]["aps"]["content-available"], 1);
    }

    #[test]
    fn test_legacy_single_device() {
        let message = Message::new()
            .add_recipient(Recipient::device("tok1"))
            .with_notification(Notification::new("t", "b"));

        let request = build_send_request(&message, &api_key(), &FcmConfig::default()).unwrap();
        assert_eq!(request.url, "https://fcm.googleapis.com/fcm/send");

        let body = request.body_json().unwrap();
        assert_eq!(body["to"], "tok1");
        assert_eq!(body["priority"], "normal");
        assert!(body.get("registration_ids").is_none());
        assert!(body.get("message").is_none());
    }

    #[test]
    fn test_legacy_batches_devices() {
        let message = Message::new().with_recipients(vec![
            Recipient::device("tok1"),
            Recipient::device("tok2"),
        ]);

        let body = serde_json::to_value(legacy_body(&message).unwrap()).unwrap();
        assert_eq!(body["registration_ids"], json!(["tok1", "tok2"]));
        assert!(body.get("to").is_none());
    }

    #[test]
    fn test_legacy_topics() {
        let single = Message::new().add_recipient(Recipient::topic("news"));
        let body = serde_json::to_value(legacy_body(&single).unwrap()).unwrap();
        assert_eq!(body["to"], "/topics/news");

        let several = Message::new()
            .add_recipient(Recipient::topic("news"))
            .add_recipient(Recipient::topic("sports"));
        let body = serde_json::to_value(legacy_body(&several).unwrap()).unwrap();
        assert_eq!(body["condition"], "'news' in topics || 'sports' in topics");
    }

    #[test]
    fn test_legacy_condition_rejects_bad_topics() {
        let quoted = Message::new()
            .add_recipient(Recipient::topic("news"))
            .add_recipient(Recipient::topic("it's"));
        assert!(matches!(
            legacy_body(&quoted),
            Err(FCMError::InvalidMessage(_))
        ));

        let too_many = Message::new().with_recipients(
            (0..6).map(|i| Recipient::topic(format!("topic-{}", i))),
        );
        assert!(matches!(
            legacy_body(&too_many),
            Err(FCMError::InvalidMessage(_))
        ));

        let five = Message::new().with_recipients(
            (0..5).map(|i| Recipient::topic(format!("topic-{}", i))),
        );
        assert!(legacy_body(&five).is_ok());
    }

    #[test]
    fn test_topic_name_validation() {
        assert!(is_valid_topic_name("Topic_1700000000_aB9z"));
        assert!(is_valid_topic_name("news.sports-~%20"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("it's"));
        assert!(!is_valid_topic_name("a b"));
    }

    #[test]
    fn test_legacy_rejects_mixed_recipients() {
        let message = Message::new()
            .add_recipient(Recipient::device("tok1"))
            .add_recipient(Recipient::topic("news"));
        assert!(matches!(
            legacy_body(&message),
            Err(FCMError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_subscription_request_with_api_key() {
        let request = build_subscription_request(
            "Topic_1_abcd",
            vec!["tok1".to_string(), "tok2".to_string()],
            "https://iid.googleapis.com/iid/v1:batchAdd",
            &api_key(),
        )
        .unwrap();

        assert_eq!(request.header_value("Authorization"), Some("key=server-key"));
        assert_eq!(request.header_value("access_token_auth"), None);
        assert_eq!(
            request.body_json().unwrap(),
            json!({"to": "/topics/Topic_1_abcd", "registration_tokens": ["tok1", "tok2"]})
        );
    }

    #[test]
    fn test_subscription_request_with_bearer() {
        let request = build_subscription_request(
            "news",
            vec!["tok1".to_string()],
            "https://iid.googleapis.com/iid/v1:batchRemove",
            &bearer(),
        )
        .unwrap();

        assert_eq!(request.header_value("Authorization"), Some("Bearer ya29.token"));
        assert_eq!(request.header_value("access_token_auth"), Some("true"));
    }
}
