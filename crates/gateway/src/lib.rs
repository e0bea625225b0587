//! Gateway: HTTP surface and account lifecycle orchestration.
//!
//! Lifecycle:
//! 1. Load config, resolve the API token
//! 2. Open the account database
//! 3. Restore a session for every persisted account
//! 4. Serve the REST API until a shutdown signal
//! 5. Disconnect every session
//!
//! Protocol details live in `wahub-whatsapp`; persistence in
//! `wahub-accounts`.

pub mod accounts;
pub mod auth;
pub mod cleanup;
pub mod error;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    accounts::{AccountInfo, AccountServiceConfig, LiveAccountService, LoginResponse},
    error::{ErrorKind, ServiceError, ServiceResult},
    server::{build_gateway_app, start_gateway},
};
