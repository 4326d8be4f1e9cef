//! Multi-recipient delivery on the v1 API.
//!
//! The v1 send endpoint accepts a single token or topic per call. Messages
//! with several recipients are either relayed through an ephemeral topic or
//! sent once per recipient.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{FanoutStrategy, FcmConfig};
use crate::errors::FCMError;
use crate::models::{Credentials, Delivery, DeliveryPath, Message, Recipient, SendReport};
use crate::request::{build_send_request, build_subscription_request};
use crate::transport::{Transport, TransportResponse};

/// `Topic_<unix seconds>_<4 random alphanumerics>`
pub fn ephemeral_topic_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("Topic_{}_{}", Utc::now().timestamp(), suffix)
}

/// POST `{"to": "/topics/<topic>", "registration_tokens": tokens}` to `url`.
///
/// The raw response is returned; the status is not interpreted here.
pub async fn process_topic_subscription(
    transport: &dyn Transport,
    credentials: &Credentials,
    topic: &str,
    tokens: Vec<String>,
    url: &str,
) -> Result<TransportResponse, FCMError> {
    debug!(topic = %topic, tokens = tokens.len(), url = %url, "Processing topic subscription");
    let request = build_subscription_request(topic, tokens, url, credentials)?;
    Ok(transport.post(request).await?)
}

/// Delivers one message to several recipients over the v1 API.
pub struct FanoutCoordinator<'a> {
    pub transport: &'a dyn Transport,
    /// Authorizes the send requests.
    pub credentials: &'a Credentials,
    /// Authorizes batchAdd / batchRemove; the server key when one is set.
    pub subscription_credentials: &'a Credentials,
    pub config: &'a FcmConfig,
}

impl<'a> FanoutCoordinator<'a> {
    /// Deliver `message` with the configured strategy.
    ///
    /// Topic relay needs device recipients only; messages that also address
    /// topics go out sequentially.
    pub async fn deliver(&self, message: &Message) -> Result<SendReport, FCMError> {
        let all_devices = message.recipients().iter().all(Recipient::is_device);

        match self.config.fanout {
            FanoutStrategy::TopicRelay if all_devices => self.relay_through_topic(message).await,
            FanoutStrategy::TopicRelay => {
                debug!("Message addresses topics, falling back to sequential fan-out");
                self.send_sequentially(message).await
            }
            FanoutStrategy::Sequential => self.send_sequentially(message).await,
        }
    }

    /// Subscribe every token to a fresh topic, send once, then unsubscribe.
    ///
    /// The relay request is built before subscribing, so a local error leaves
    /// no topic behind. A failed subscribe is returned as the final response
    /// with no delivery attempted. A failed unsubscribe is only reported as a
    /// warning.
    pub async fn relay_through_topic(&self, message: &Message) -> Result<SendReport, FCMError> {
        let topic = ephemeral_topic_name();
        let tokens = message.device_tokens();

        let relayed = message.retarget(Recipient::topic(topic.clone()));
        let request = build_send_request(&relayed, self.credentials, self.config)?;

        info!(topic = %topic, recipients = tokens.len(), "Relaying message through ephemeral topic");

        let subscribed = process_topic_subscription(
            self.transport,
            self.subscription_credentials,
            &topic,
            tokens.clone(),
            &self.config.endpoints.topic_add_url,
        )
        .await?;

        if !subscribed.is_success() {
            warn!(
                topic = %topic,
                status = subscribed.status,
                "Topic subscription failed, message not sent"
            );
            return Ok(SendReport {
                response: subscribed,
                path: DeliveryPath::TopicRelay { topic },
                deliveries: Vec::new(),
                teardown_warning: None,
            });
        }

        let response = self.transport.post(request).await?;

        let mut teardown_warning = None;
        if response.is_success() {
            teardown_warning = self.tear_down(&topic, tokens).await;
        } else {
            warn!(topic = %topic, status = response.status, "Relay send rejected");
        }

        Ok(SendReport {
            response,
            path: DeliveryPath::TopicRelay { topic },
            deliveries: Vec::new(),
            teardown_warning,
        })
    }

    async fn tear_down(&self, topic: &str, tokens: Vec<String>) -> Option<FCMError> {
        let result = process_topic_subscription(
            self.transport,
            self.subscription_credentials,
            topic,
            tokens,
            &self.config.endpoints.topic_remove_url,
        )
        .await;

        let failure = match result {
            Ok(response) if response.is_success() => return None,
            Ok(response) => FCMError::Subscription {
                status: response.status,
                body: response.text(),
            },
            Err(e) => e,
        };

        warn!(topic = %topic, error = %failure, "Ephemeral topic teardown failed");
        Some(failure)
    }

    /// One request per recipient, in order.
    ///
    /// Every recipient is attempted regardless of earlier statuses. The
    /// report's `response` is the last one observed and `deliveries` holds
    /// all of them. A transport error stops the loop and is returned.
    pub async fn send_sequentially(&self, message: &Message) -> Result<SendReport, FCMError> {
        let mut deliveries = Vec::with_capacity(message.recipients().len());

        for recipient in message.recipients() {
            let single = message.retarget(recipient.clone());
            let request = build_send_request(&single, self.credentials, self.config)?;
            let response = self.transport.post(request).await?;

            if !response.is_success() {
                warn!(status = response.status, "Per-recipient send rejected");
            }

            deliveries.push(Delivery {
                recipient: recipient.clone(),
                response,
            });
        }

        let response = deliveries
            .last()
            .map(|d| d.response.clone())
            .ok_or_else(|| FCMError::InvalidMessage("message has no recipients".to_string()))?;

        let failed = deliveries.iter().filter(|d| !d.response.is_success()).count();
        info!(
            "Sequential send complete: {} succeeded, {} failed",
            deliveries.len() - failed,
            failed
        );

        Ok(SendReport {
            response,
            path: DeliveryPath::Sequential,
            deliveries,
            teardown_warning: None,
        })
    }
}
