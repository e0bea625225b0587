//! Protocol-client seam consumed by the gateway.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::device_store::DeviceStore;

/// Identity of a linked device. Only available once logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Full device JID, e.g. `628123456789:12@s.whatsapp.net`.
    pub device_id: String,
    /// User part of the JID.
    pub phone_number: String,
}

impl DeviceIdentity {
    pub fn from_jid(jid: &str) -> Self {
        let user = jid.split('@').next().unwrap_or_default();
        let phone = user.split([':', '.']).next().unwrap_or_default();
        Self {
            device_id: jid.to_string(),
            phone_number: phone.to_string(),
        }
    }
}

/// Events delivered on the channel returned by [`WhatsAppClient::auth_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A QR challenge to scan, valid for `timeout`.
    Code { code: String, timeout: Duration },
    /// The device was paired.
    Success(DeviceIdentity),
}

/// Lifecycle events a client reports outside of a login wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    PairSuccess(DeviceIdentity),
    LoggedOut,
}

/// A [`ClientEvent`] tagged with the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEvent {
    pub account_id: String,
    pub event: ClientEvent,
}

pub type EventSender = mpsc::UnboundedSender<AccountEvent>;

/// One tenant's connection to the WhatsApp network.
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    /// Open the connection. Resolves once the transport is up, not once the
    /// device is authenticated.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// Subscribe to authentication events. Must be called before `connect`
    /// for the first QR code to be observed. A new subscription replaces the
    /// previous one.
    async fn auth_events(&self) -> Result<mpsc::Receiver<AuthEvent>>;

    /// Request a pairing code for `phone_number`. The client must be connected.
    async fn pair_phone(&self, phone_number: &str) -> Result<String>;

    /// Unlink the device from the phone and drop its credentials.
    async fn logout(&self) -> Result<()>;

    fn identity(&self) -> Option<DeviceIdentity>;
}

/// Builds a client bound to one account's storage.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        account_id: &str,
        store: Arc<DeviceStore>,
        events: EventSender,
    ) -> Result<Arc<dyn WhatsAppClient>>;
}
