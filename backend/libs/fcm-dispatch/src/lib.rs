/// FCM Dispatch Library
///
/// A Firebase Cloud Messaging (FCM) client for sending push notifications
/// to Android, iOS and Web devices.
///
/// It handles:
/// - RS256-signed assertions and the OAuth2 jwt-bearer token exchange
/// - Request building for the v1 and legacy send APIs
/// - Multi-recipient fan-out through ephemeral topics or per-recipient sends
/// - Topic subscription management (batchAdd / batchRemove)
/// - A pluggable HTTP transport with a reqwest default
pub mod assertion;
pub mod client;
pub mod config;
pub mod errors;
pub mod fanout;
pub mod models;
pub mod request;
pub mod token;
pub mod transport;

pub use client::FCMClient;
pub use config::{Endpoints, FanoutStrategy, FcmConfig};
pub use errors::{FCMError, TransportError};
pub use models::{
    AddressTarget, BearerToken, Credentials, Delivery, DeliveryPath, Device, Message,
    Notification, Priority, Recipient, SendReport, ServiceAccountKey, Topic,
};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
