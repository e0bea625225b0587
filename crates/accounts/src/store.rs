//! Storage abstraction for accounts and their webhook configuration.

use {anyhow::Result, async_trait::async_trait};

use crate::types::{Account, Webhook};

/// Returned by [`AccountStore::create_account`] when the id is taken.
#[derive(Debug, thiserror::Error)]
#[error("account {0} already exists")]
pub struct AccountExists(pub String);

#[async_trait]
pub trait AccountStore: Send + Sync {
    // ---- accounts ----

    /// Insert an account together with an empty webhook row. Fails with
    /// [`AccountExists`] if the id is already taken.
    async fn create_account(&self, account: &Account) -> Result<()>;

    /// `Ok(None)` when no such account exists.
    async fn get_account(&self, id: &str) -> Result<Option<Account>>;

    /// Overwrite status, phone number, device id and last-connected time.
    /// `id` and `created_at` are never touched.
    async fn update_account(&self, account: &Account) -> Result<()>;

    /// Delete an account; its webhook row goes with it.
    async fn delete_account(&self, id: &str) -> Result<()>;

    /// All accounts, most recently created first.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    // ---- webhooks ----

    async fn set_webhook(&self, account_id: &str, url: &str, secret: &str) -> Result<()>;

    /// Empty webhook when none was ever set.
    async fn get_webhook(&self, account_id: &str) -> Result<Webhook>;
}
