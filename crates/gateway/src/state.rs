use std::{sync::Arc, time::Instant};

use crate::{accounts::LiveAccountService, auth::ResolvedAuth};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub auth: ResolvedAuth,
    pub accounts: Arc<LiveAccountService>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(auth: ResolvedAuth, accounts: Arc<LiveAccountService>) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth,
            accounts,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// ── Router state ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}
