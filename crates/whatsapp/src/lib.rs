//! WhatsApp session plumbing for the multi-account gateway.
//!
//! The gateway talks to the protocol only through [`WhatsAppClient`]. One
//! client plus its [`DeviceStore`] form a [`Session`], and live sessions are
//! held by the [`SessionRegistry`]. The production client forwards every call
//! to a WhatsApp Web sidecar process over a WebSocket.

pub mod client;
pub mod device_store;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod qr;
pub mod registry;
pub mod sidecar;
pub mod sidecar_client;
pub mod types;

pub use {
    client::{
        AccountEvent, AuthEvent, ClientEvent, ClientFactory, DeviceIdentity, EventSender,
        WhatsAppClient,
    },
    device_store::DeviceStore,
    qr::QrRenderer,
    registry::{Session, SessionRegistry},
    sidecar::DEFAULT_SIDECAR_PORT,
    sidecar_client::{SidecarClient, SidecarClientFactory},
};
