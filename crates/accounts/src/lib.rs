//! Durable account and webhook records.
//!
//! Every tenant has one row in `accounts` and exactly one row in
//! `account_webhooks`, removed together through `ON DELETE CASCADE`.

pub mod sqlite;
pub mod store;
pub mod types;

pub use {
    sqlite::SqliteAccountStore,
    store::{AccountExists, AccountStore},
    types::{Account, AccountStatus, Webhook},
};
