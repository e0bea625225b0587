use std::str::FromStr;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    tracing::{debug, warn},
};

use crate::{
    store::{AccountExists, AccountStore},
    types::{Account, AccountStatus, Webhook},
};

/// SQLite-backed account store.
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    status: String,
    phone_number: String,
    device_id: String,
    created_at: i64,
    last_connected: Option<i64>,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(r: AccountRow) -> Result<Self> {
        Ok(Self {
            status: AccountStatus::from_str(&r.status)?,
            created_at: from_millis(r.created_at)?,
            last_connected: r.last_connected.map(from_millis).transpose()?,
            id: r.id,
            phone_number: r.phone_number,
            device_id: r.device_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WebhookRow {
    webhook_url: String,
    webhook_secret: String,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {ms}"))
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and make sure the
    /// tables exist.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open accounts database {url}"))?;
        Self::init(&pool).await?;
        debug!(url, "accounts database ready");
        Ok(Self::new(pool))
    }

    /// Create the `accounts` and `account_webhooks` tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS accounts (
                id             TEXT PRIMARY KEY,
                status         TEXT NOT NULL DEFAULT 'disconnected',
                phone_number   TEXT NOT NULL DEFAULT '',
                device_id      TEXT NOT NULL DEFAULT '',
                created_at     INTEGER NOT NULL,
                last_connected INTEGER
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS account_webhooks (
                account_id     TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
                webhook_url    TEXT NOT NULL DEFAULT '',
                webhook_secret TEXT NOT NULL DEFAULT ''
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO accounts (id, status, phone_number, device_id, created_at, last_connected)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&account.id)
        .bind(account.status.as_str())
        .bind(&account.phone_number)
        .bind(&account.device_id)
        .bind(account.created_at.timestamp_millis())
        .bind(account.last_connected.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                anyhow::Error::new(AccountExists(account.id.clone()))
            },
            e => anyhow::Error::new(e).context(format!("failed to insert account {}", account.id)),
        })?;

        sqlx::query(
            "INSERT INTO account_webhooks (account_id, webhook_url, webhook_secret) VALUES (?, '', '')",
        )
        .bind(&account.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"SELECT id, status, phone_number, device_id, created_at, last_connected
               FROM accounts WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn update_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts
               SET status = ?, phone_number = ?, device_id = ?, last_connected = ?
               WHERE id = ?"#,
        )
        .bind(account.status.as_str())
        .bind(&account.phone_number)
        .bind(&account.device_id)
        .bind(account.last_connected.map(|t| t.timestamp_millis()))
        .bind(&account.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"SELECT id, status, phone_number, device_id, created_at, last_connected
               FROM accounts ORDER BY created_at DESC, rowid DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                Account::try_from(row)
                    .map_err(|e| warn!(account_id = %id, error = %e, "skipping unreadable account row"))
                    .ok()
            })
            .collect())
    }

    async fn set_webhook(&self, account_id: &str, url: &str, secret: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO account_webhooks (account_id, webhook_url, webhook_secret)
               VALUES (?, ?, ?)
               ON CONFLICT(account_id) DO UPDATE SET
                 webhook_url = excluded.webhook_url,
                 webhook_secret = excluded.webhook_secret"#,
        )
        .bind(account_id)
        .bind(url)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_webhook(&self, account_id: &str) -> Result<Webhook> {
        let row = sqlx::query_as::<_, WebhookRow>(
            "SELECT webhook_url, webhook_secret FROM account_webhooks WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| Webhook {
                url: r.webhook_url,
                secret: r.webhook_secret,
            })
            .unwrap_or_default())
    }
}
