//! Account lifecycle: provisioning, login flows and teardown.
//!
//! `LiveAccountService` is the only component that touches both the
//! persisted [`Account`] records and the live sessions in the
//! [`SessionRegistry`]. Every public operation returns a [`ServiceError`]
//! whose kind the REST layer maps straight to a status code.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    wahub_accounts::{Account, AccountExists, AccountStatus, AccountStore, Webhook},
    wahub_config::WahubConfig,
    wahub_whatsapp::{
        AccountEvent, AuthEvent, ClientEvent, ClientFactory, DeviceIdentity, DeviceStore,
        EventSender, QrRenderer, Session, SessionRegistry, device_store::retire_artifact,
    },
};

use crate::{
    cleanup::CleanupQueue,
    error::{ServiceError, ServiceResult},
};

/// Upper bound on how long a QR login waits for the first auth event.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

const NOT_FOUND: &str = "Account not found";
const NOT_INITIALIZED: &str = "Account not found or not initialized";

// ── Types ────────────────────────────────────────────────────────────────────

/// Filesystem layout and timing used by the service.
#[derive(Debug, Clone)]
pub struct AccountServiceConfig {
    /// Parent of every `whatsapp_<id>` device store.
    pub storages_dir: PathBuf,
    /// Parent of every `keys_<id>` key store, when one is configured.
    pub keys_dir: Option<PathBuf>,
    pub qr_dir: PathBuf,
    pub login_timeout: Duration,
}

impl AccountServiceConfig {
    pub fn from_config(config: &WahubConfig) -> Self {
        Self {
            storages_dir: config.storages_dir(),
            keys_dir: config.storage.keys_dir.clone(),
            qr_dir: config.qr_dir(),
            login_timeout: Duration::from_secs(config.login.timeout_secs),
        }
    }
}

/// Persisted account fields merged with live session state.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub status: AccountStatus,
    pub phone_number: String,
    pub device_id: String,
    pub is_connected: bool,
    pub is_logged_in: bool,
    pub webhook_url: String,
    pub created_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
}

/// Outcome of a QR login: either a code to scan or `code == "success"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// Server path the rendered PNG is served under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_link: Option<String>,
    /// Seconds the code stays valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl LoginResponse {
    fn success() -> Self {
        Self {
            code: "success".into(),
            image_path: None,
            qr_link: None,
            duration: None,
        }
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct LiveAccountService {
    store: Arc<dyn AccountStore>,
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn ClientFactory>,
    qr: QrRenderer,
    cleanup: CleanupQueue,
    events: EventSender,
    config: AccountServiceConfig,
}

impl LiveAccountService {
    /// Build the service and start its event loop and cleanup worker.
    pub fn new(
        store: Arc<dyn AccountStore>,
        registry: Arc<SessionRegistry>,
        factory: Arc<dyn ClientFactory>,
        config: AccountServiceConfig,
    ) -> Arc<Self> {
        let (events, mut events_rx) = mpsc::unbounded_channel::<AccountEvent>();
        let (cleanup, _worker) = CleanupQueue::spawn();

        let service = Arc::new(Self {
            store,
            registry,
            factory,
            qr: QrRenderer::new(config.qr_dir.clone()),
            cleanup,
            events,
            config,
        });

        // The loop holds a weak handle: the sender lives inside the service,
        // so the channel closes once the service is dropped.
        let weak = Arc::downgrade(&service);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(service) = weak.upgrade() else {
                    break;
                };
                service.handle_event(event).await;
            }
            debug!("account event loop stopped");
        });

        service
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn qr_renderer(&self) -> &QrRenderer {
        &self.qr
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    async fn find_account(&self, id: &str) -> ServiceResult<Option<Account>> {
        self.store
            .get_account(id)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to get account", &e))
    }

    async fn require_account(&self, id: &str) -> ServiceResult<Account> {
        self.find_account(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(NOT_FOUND))
    }

    async fn require_session(&self, id: &str) -> ServiceResult<Session> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| ServiceError::not_found(NOT_INITIALIZED))
    }

    async fn save(&self, account: &Account) -> ServiceResult<()> {
        self.store
            .update_account(account)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to update account", &e))
    }

    /// Apply `change` to the persisted record, if it still exists.
    async fn update_status(
        &self,
        id: &str,
        change: impl FnOnce(&mut Account),
    ) -> ServiceResult<()> {
        match self.find_account(id).await? {
            Some(mut account) => {
                change(&mut account);
                self.save(&account).await
            },
            None => {
                debug!(account_id = id, "account vanished before status update");
                Ok(())
            },
        }
    }

    async fn mark_logged_in(&self, id: &str, identity: &DeviceIdentity) -> ServiceResult<()> {
        self.update_status(id, |account| {
            account.mark_connected(AccountStatus::LoggedIn);
            account.phone_number = identity.phone_number.clone();
            account.device_id = identity.device_id.clone();
        })
        .await
    }

    /// Every artifact an account may own on disk, whether or not a session
    /// is live.
    fn artifact_paths(&self, id: &str) -> Vec<PathBuf> {
        let mut paths = vec![DeviceStore::path_for(&self.config.storages_dir, id)];
        if let Some(keys_root) = &self.config.keys_dir {
            paths.push(DeviceStore::keys_path_for(keys_root, id));
        }
        paths
    }

    /// Move the account's artifacts off their live paths. The returned
    /// copies are what the cleanup queue may delete; the live paths are
    /// never queued, so a re-created account keeps its fresh store.
    async fn retire_artifacts(&self, id: &str) -> Vec<PathBuf> {
        let mut retired = Vec::new();
        for path in self.artifact_paths(id) {
            match retire_artifact(&path).await {
                Ok(Some(moved)) => retired.push(moved),
                Ok(None) => {},
                Err(e) => {
                    warn!(account_id = id, error = %e, "failed to retire account artifact");
                },
            }
        }
        retired
    }

    /// Open the device store, build a client and register the session.
    async fn provision(&self, id: &str) -> anyhow::Result<Session> {
        let store = Arc::new(
            DeviceStore::open(&self.config.storages_dir, id, self.config.keys_dir.as_deref())
                .await?,
        );
        let client = self
            .factory
            .create(id, Arc::clone(&store), self.events.clone())
            .await?;
        let session = Session {
            account_id: id.to_string(),
            client,
            store,
        };
        self.registry.set(session.clone()).await;
        anyhow::ensure!(
            self.registry.contains(id).await,
            "session for {id} was not registered"
        );
        Ok(session)
    }

    async fn info(&self, account: Account) -> AccountInfo {
        let mut info = AccountInfo {
            account_id: account.id,
            status: account.status,
            phone_number: account.phone_number,
            device_id: account.device_id,
            is_connected: false,
            is_logged_in: false,
            webhook_url: String::new(),
            created_at: account.created_at,
            last_connected: account.last_connected,
        };

        if let Some(session) = self.registry.get(&info.account_id).await {
            info.is_connected = session.client.is_connected();
            info.is_logged_in = session.client.is_logged_in();
            if let Some(identity) = session.client.identity() {
                info.device_id = identity.device_id;
            }
        }

        match self.store.get_webhook(&info.account_id).await {
            Ok(webhook) => info.webhook_url = webhook.url,
            Err(e) => {
                warn!(account_id = %info.account_id, error = %e, "failed to load webhook");
            },
        }
        info
    }

    // ── Account CRUD ─────────────────────────────────────────────────────────

    pub async fn create(&self, id: &str) -> ServiceResult<()> {
        if self.find_account(id).await?.is_some() {
            return Err(ServiceError::bad_request("Account already exists"));
        }

        // The insert is the arbiter between concurrent creates of one id. A
        // loser may also see a lock error, so recheck before blaming storage.
        if let Err(e) = self.store.create_account(&Account::new(id)).await {
            let exists = e.downcast_ref::<AccountExists>().is_some()
                || self.find_account(id).await?.is_some();
            if exists {
                return Err(ServiceError::bad_request("Account already exists"));
            }
            return Err(ServiceError::internal_from("Failed to create account", &e));
        }

        if let Err(e) = self.provision(id).await {
            warn!(account_id = id, error = %e, "account provisioning failed, rolling back");
            self.registry.remove(id).await;
            // Artifacts move aside while the row still reserves the id.
            let retired = self.retire_artifacts(id).await;
            if let Err(rollback) = self.store.delete_account(id).await {
                warn!(account_id = id, error = %rollback, "failed to roll back account row");
            }
            self.cleanup.remove_paths(id, retired);
            return Err(ServiceError::internal_from(
                "Failed to initialize WhatsApp client",
                &e,
            ));
        }

        info!(account_id = id, "account created");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        self.require_account(id).await?;

        self.registry.remove(id).await;
        // Artifacts move aside while the row still reserves the id, so a
        // concurrent create cannot reopen the store in between.
        let retired = self.retire_artifacts(id).await;
        self.store
            .delete_account(id)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to delete account", &e))?;
        self.cleanup.remove_paths(id, retired);

        info!(account_id = id, "account deleted");
        Ok(())
    }

    pub async fn list(&self) -> ServiceResult<Vec<AccountInfo>> {
        let accounts = self
            .store
            .list_accounts()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to list accounts", &e))?;

        let mut infos = Vec::with_capacity(accounts.len());
        for account in accounts {
            infos.push(self.info(account).await);
        }
        Ok(infos)
    }

    pub async fn get(&self, id: &str) -> ServiceResult<AccountInfo> {
        let account = self.require_account(id).await?;
        Ok(self.info(account).await)
    }

    // ── Login flows ──────────────────────────────────────────────────────────

    /// QR login. Resolves with the first auth event, or times out.
    ///
    /// The wait lives in the caller's future and never holds the registry
    /// lock. Dropping the future drops the auth receiver.
    pub async fn login(&self, id: &str) -> ServiceResult<LoginResponse> {
        let session = self.require_session(id).await?;
        let client = &session.client;
        if client.is_logged_in() {
            return Err(ServiceError::bad_request("Account is already logged in"));
        }
        if client.is_connected() {
            client.disconnect().await;
        }

        let mut auth = client
            .auth_events()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to subscribe to QR events", &e))?;
        client
            .connect()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to connect", &e))?;

        let event = match tokio::time::timeout(self.config.login_timeout, auth.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(ServiceError::context(
                    "Login was cancelled before a QR code was received",
                ));
            },
            Err(_) => {
                info!(account_id = id, "QR login timed out");
                return Err(ServiceError::request_timeout("QR code generation timeout"));
            },
        };

        match event {
            AuthEvent::Code { code, timeout } => {
                let path = self
                    .qr
                    .render(id, &code)
                    .await
                    .map_err(|e| ServiceError::internal_from("Failed to generate QR code", &e))?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(LoginResponse {
                    code,
                    image_path: Some(path.display().to_string()),
                    qr_link: Some(format!("/qr/{file_name}")),
                    duration: Some(timeout.as_secs()),
                })
            },
            AuthEvent::Success(identity) => {
                self.mark_logged_in(id, &identity).await?;
                info!(account_id = id, phone = %identity.phone_number, "account logged in");
                Ok(LoginResponse::success())
            },
        }
    }

    /// Pairing-code login. Completion arrives later as a `PairSuccess` event.
    pub async fn login_with_code(&self, id: &str, phone_number: &str) -> ServiceResult<String> {
        let session = self.require_session(id).await?;
        let client = &session.client;
        if client.is_logged_in() {
            return Err(ServiceError::bad_request("Account is already logged in"));
        }
        if client.is_connected() {
            client.disconnect().await;
        }

        client
            .connect()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to connect", &e))?;
        client
            .pair_phone(phone_number)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to generate pairing code", &e))
    }

    pub async fn logout(&self, id: &str) -> ServiceResult<()> {
        let session = self.require_session(id).await?;
        if !session.client.is_logged_in() {
            return Err(ServiceError::bad_request("Account is not logged in"));
        }

        session
            .client
            .logout()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to logout", &e))?;

        self.update_status(id, |account| account.status = AccountStatus::Disconnected)
            .await?;
        info!(account_id = id, "account logged out");
        Ok(())
    }

    pub async fn reconnect(&self, id: &str) -> ServiceResult<()> {
        let session = self.require_session(id).await?;
        if !session.client.is_logged_in() {
            return Err(ServiceError::bad_request("Account is not logged in"));
        }
        self.connect_session(&session).await
    }

    async fn connect_session(&self, session: &Session) -> ServiceResult<()> {
        let client = &session.client;
        if client.is_connected() {
            client.disconnect().await;
        }
        client
            .connect()
            .await
            .map_err(|e| ServiceError::internal_from("Failed to reconnect", &e))?;

        self.update_status(&session.account_id, |account| {
            account.mark_connected(AccountStatus::Connected)
        })
        .await
    }

    // ── Webhooks ─────────────────────────────────────────────────────────────

    pub async fn set_webhook(&self, id: &str, url: &str, secret: &str) -> ServiceResult<()> {
        self.require_account(id).await?;
        self.store
            .set_webhook(id, url, secret)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to set webhook", &e))
    }

    pub async fn get_webhook(&self, id: &str) -> ServiceResult<Webhook> {
        self.require_account(id).await?;
        self.store
            .get_webhook(id)
            .await
            .map_err(|e| ServiceError::internal_from("Failed to get webhook", &e))
    }

    // ── Process lifecycle ────────────────────────────────────────────────────

    /// Provision a session for every persisted account. Accounts with stored
    /// credentials reconnect in the background. Returns the number of
    /// sessions provisioned.
    pub async fn restore_sessions(self: &Arc<Self>) -> anyhow::Result<usize> {
        let accounts = self.store.list_accounts().await?;
        let mut restored = 0;

        for account in accounts {
            let session = match self.provision(&account.id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "failed to restore session");
                    continue;
                },
            };
            restored += 1;

            if session.client.is_logged_in() {
                let service = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = service.connect_session(&session).await {
                        warn!(
                            account_id = %session.account_id,
                            error = %e,
                            "background reconnect failed"
                        );
                    }
                });
            }
        }

        info!(restored, "sessions restored");
        Ok(restored)
    }

    /// Keep persisted status in step with what the protocol reports.
    pub async fn handle_event(&self, event: AccountEvent) {
        let AccountEvent { account_id, event } = event;
        let result = match event {
            ClientEvent::PairSuccess(identity) => {
                info!(account_id = %account_id, phone = %identity.phone_number, "device paired");
                self.mark_logged_in(&account_id, &identity).await
            },
            ClientEvent::LoggedOut => {
                info!(account_id = %account_id, "device logged out remotely");
                self.update_status(&account_id, |account| {
                    account.status = AccountStatus::Disconnected
                })
                .await
            },
            ClientEvent::Disconnected { reason } => {
                info!(account_id = %account_id, reason = %reason, "client disconnected");
                self.update_status(&account_id, |account| {
                    if account.status == AccountStatus::Connected {
                        account.status = AccountStatus::Disconnected;
                    }
                })
                .await
            },
            ClientEvent::Connected => {
                info!(account_id = %account_id, "client connected");
                Ok(())
            },
        };

        if let Err(e) = result {
            warn!(account_id = %account_id, error = %e, "failed to apply client event");
        }
    }

    /// Disconnect every session and let queued cleanups finish.
    pub async fn shutdown(&self) {
        let count = self.registry.len().await;
        self.registry.clear().await;
        self.cleanup.flush().await;
        info!(count, "all sessions disconnected");
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::error::ErrorKind,
        wahub_accounts::SqliteAccountStore,
        wahub_whatsapp::{
            WhatsAppClient,
            mock::{MockClient, MockClientFactory},
        },
    };

    struct Fixture {
        service: Arc<LiveAccountService>,
        factory: Arc<MockClientFactory>,
        store: Arc<SqliteAccountStore>,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn client(&self, id: &str) -> Arc<MockClient> {
            self.factory.client(id).unwrap()
        }

        fn store_dir(&self, id: &str) -> PathBuf {
            self.dir.path().join("storages").join(format!("whatsapp_{id}"))
        }
    }

    async fn fixture_with(login_timeout: Duration, keys: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("accounts.db").display());
        let store = Arc::new(SqliteAccountStore::connect(&url).await.unwrap());
        let factory = Arc::new(MockClientFactory::new());
        let config = AccountServiceConfig {
            storages_dir: dir.path().join("storages"),
            keys_dir: keys.then(|| dir.path().join("keys")),
            qr_dir: dir.path().join("qrcode"),
            login_timeout,
        };
        let service = LiveAccountService::new(
            store.clone(),
            Arc::new(SessionRegistry::new()),
            factory.clone(),
            config,
        );
        Fixture {
            service,
            factory,
            store,
            dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(DEFAULT_LOGIN_TIMEOUT, false).await
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_jid("628123456789:7@s.whatsapp.net")
    }

    async fn status(f: &Fixture, id: &str) -> AccountStatus {
        f.store.get_account(id).await.unwrap().unwrap().status
    }

    // ── CRUD ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_get_duplicate_and_missing() {
        let f = fixture().await;

        f.service.create("acct1").await.unwrap();
        let err = f.service.create("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Account already exists");

        let err = f.service.get("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Account not found");

        let info = f.service.get("acct1").await.unwrap();
        assert_eq!(info.status, AccountStatus::Disconnected);
        assert!(!info.is_connected);
        assert!(!info.is_logged_in);
        assert_eq!(info.webhook_url, "");
        assert!(f.store_dir("acct1").is_dir());
        assert!(f.service.registry().contains("acct1").await);
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_client_fails() {
        let f = fixture().await;
        f.factory.set_fail(true);

        let err = f.service.create("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InternalServerError);
        assert!(err.message.starts_with("Failed to initialize WhatsApp client"));

        assert!(f.store.get_account("acct1").await.unwrap().is_none());
        assert!(!f.service.registry().contains("acct1").await);
        f.service.cleanup.flush().await;
        assert!(!f.store_dir("acct1").exists());

        // The id is free again.
        f.factory.set_fail(false);
        f.service.create("acct1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_cascades_and_cleans_up() {
        let f = fixture_with(DEFAULT_LOGIN_TIMEOUT, true).await;
        f.service.create("acct1").await.unwrap();
        f.service
            .set_webhook("acct1", "https://example.com/hook", "s3cr3t")
            .await
            .unwrap();
        let client = f.client("acct1");
        client.connect_now();
        let keys_dir = f.dir.path().join("keys").join("keys_acct1");
        assert!(keys_dir.is_dir());

        f.service.delete("acct1").await.unwrap();
        f.service.cleanup.flush().await;

        assert!(!client.is_connected());
        assert!(!f.service.registry().contains("acct1").await);
        assert!(f.store.get_account("acct1").await.unwrap().is_none());
        assert_eq!(
            f.store.get_webhook("acct1").await.unwrap(),
            Webhook::default()
        );
        assert!(!f.store_dir("acct1").exists());
        assert!(!keys_dir.exists());

        let err = f.service.delete("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_recreate_after_delete_keeps_new_store() {
        let f = fixture_with(DEFAULT_LOGIN_TIMEOUT, true).await;
        let ids: Vec<String> = (0..10).map(|i| format!("a{i}")).collect();
        for id in &ids {
            f.service.create(id).await.unwrap();
            for n in 0..50 {
                std::fs::write(f.store_dir(id).join(format!("key-{n}")), b"k").unwrap();
            }
        }
        for id in &ids {
            f.service.delete(id).await.unwrap();
        }

        // Same id again before the cleanup worker has caught up.
        f.service.create("a9").await.unwrap();
        f.service.cleanup.flush().await;

        assert!(f.service.registry().contains("a9").await);
        assert!(f.store_dir("a9").is_dir());
        assert!(!f.store_dir("a9").join("key-0").exists());
        assert!(f.dir.path().join("keys").join("keys_a9").is_dir());
        let mut left: Vec<String> = std::fs::read_dir(f.dir.path().join("storages"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["whatsapp_a9".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_create_rejects_duplicate() {
        let f = fixture().await;

        let (a, b) = tokio::join!(f.service.create("dup1"), f.service.create("dup1"));

        let mut results = [a, b];
        results.sort_by_key(|r| r.is_err());
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Account already exists");
        assert!(f.service.registry().contains("dup1").await);
        assert!(f.store_dir("dup1").is_dir());
    }

    #[tokio::test]
    async fn test_list_enriches_with_live_state() {
        let f = fixture().await;
        f.service.create("a").await.unwrap();
        f.service.create("b").await.unwrap();
        f.service
            .set_webhook("a", "https://example.com/a", "")
            .await
            .unwrap();
        f.client("a").set_identity(Some(identity()));
        f.client("a").connect_now();

        let infos = f.service.list().await.unwrap();
        assert_eq!(infos.len(), 2);
        let a = infos.iter().find(|i| i.account_id == "a").unwrap();
        assert!(a.is_connected);
        assert!(a.is_logged_in);
        assert_eq!(a.device_id, "628123456789:7@s.whatsapp.net");
        assert_eq!(a.webhook_url, "https://example.com/a");
        let b = infos.iter().find(|i| i.account_id == "b").unwrap();
        assert!(!b.is_connected);
    }

    #[tokio::test]
    async fn test_webhook_round_trip() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.service
            .set_webhook("acct1", "https://example.com/hook", "s3cr3t")
            .await
            .unwrap();

        let webhook = f.service.get_webhook("acct1").await.unwrap();
        assert_eq!(webhook.url, "https://example.com/hook");
        assert_eq!(webhook.secret, "s3cr3t");

        let err = f.service.set_webhook("ghost", "u", "s").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = f.service.get_webhook("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    // ── Login ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_login_unknown_account() {
        let f = fixture().await;
        let err = f.service.login("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Account not found or not initialized");
    }

    #[tokio::test]
    async fn test_login_returns_rendered_qr() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        let client = f.client("acct1");
        client.connect_now();
        client.script_auth([AuthEvent::Code {
            code: "2@qrpayload".into(),
            timeout: Duration::from_secs(60),
        }]);

        let response = f.service.login("acct1").await.unwrap();

        assert_eq!(response.code, "2@qrpayload");
        assert_eq!(response.duration, Some(60));
        let path = PathBuf::from(response.image_path.unwrap());
        assert!(path.is_file());
        assert!(response.qr_link.unwrap().starts_with("/qr/scan-acct1-"));
        // A login always starts from a fresh connection.
        assert_eq!(client.disconnect_calls(), 1);
        assert_eq!(status(&f, "acct1").await, AccountStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_login_success_persists_identity() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1")
            .script_auth([AuthEvent::Success(identity())]);

        let response = f.service.login("acct1").await.unwrap();
        assert_eq!(response, LoginResponse::success());

        let account = f.store.get_account("acct1").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::LoggedIn);
        assert_eq!(account.phone_number, "628123456789");
        assert_eq!(account.device_id, "628123456789:7@s.whatsapp.net");
        assert!(account.last_connected.is_some());

        let err = f.service.login("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Account is already logged in");
    }

    #[tokio::test]
    async fn test_login_times_out_without_touching_state() {
        let f = fixture_with(Duration::from_millis(50), false).await;
        f.service.create("acct1").await.unwrap();

        let err = f.service.login("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestTimeout);
        assert_eq!(err.message, "QR code generation timeout");

        let account = f.store.get_account("acct1").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Disconnected);
        assert!(account.last_connected.is_none());
    }

    #[tokio::test]
    async fn test_login_closed_auth_stream_is_context_error() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1").set_close_auth_on_connect(true);

        let err = f.service.login("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContextError);
    }

    #[tokio::test]
    async fn test_login_connect_failure_is_internal() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1").set_fail_connect(true);

        let err = f.service.login("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InternalServerError);
        assert_eq!(err.message, "Failed to connect: connection refused");
    }

    #[tokio::test]
    async fn test_login_with_code() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1").set_pair_code("WXYZ-9876");

        let code = f
            .service
            .login_with_code("acct1", "628123456789")
            .await
            .unwrap();
        assert_eq!(code, "WXYZ-9876");
        assert!(f.client("acct1").is_connected());

        let err = f
            .service
            .login_with_code("ghost", "628123456789")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        f.client("acct1").set_identity(Some(identity()));
        let err = f
            .service
            .login_with_code("acct1", "628123456789")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    // ── Logout / reconnect ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_logout_requires_login() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();

        let err = f.service.logout("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.message, "Account is not logged in");

        let err = f.service.logout("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_logout_persists_disconnected() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1")
            .script_auth([AuthEvent::Success(identity())]);
        f.service.login("acct1").await.unwrap();

        f.service.logout("acct1").await.unwrap();

        assert_eq!(f.client("acct1").logout_calls(), 1);
        assert!(!f.client("acct1").is_logged_in());
        assert_eq!(status(&f, "acct1").await, AccountStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_logout_leaves_local_credentials_to_client() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();
        f.client("acct1")
            .script_auth([AuthEvent::Success(identity())]);
        f.service.login("acct1").await.unwrap();
        let session = f.service.registry().get("acct1").await.unwrap();
        session.store.save_identity(&identity()).await.unwrap();

        f.service.logout("acct1").await.unwrap();

        // Local credentials belong to the client; the service only flips
        // the persisted status.
        assert!(session.store.load_identity().await.unwrap().is_some());
        assert_eq!(status(&f, "acct1").await, AccountStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();

        let err = f.service.reconnect("acct1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let client = f.client("acct1");
        client.set_identity(Some(identity()));
        client.connect_now();
        f.service.reconnect("acct1").await.unwrap();

        assert_eq!(client.disconnect_calls(), 1);
        assert_eq!(client.connect_calls(), 1);
        assert!(client.is_connected());
        let account = f.store.get_account("acct1").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Connected);
        assert!(account.last_connected.is_some());
    }

    // ── Events and lifecycle ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_events_update_persisted_status() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();

        f.service
            .handle_event(AccountEvent {
                account_id: "acct1".into(),
                event: ClientEvent::PairSuccess(identity()),
            })
            .await;
        let account = f.store.get_account("acct1").await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::LoggedIn);
        assert_eq!(account.phone_number, "628123456789");

        // A drop while logged in keeps LoggedIn.
        f.service
            .handle_event(AccountEvent {
                account_id: "acct1".into(),
                event: ClientEvent::Disconnected {
                    reason: "stream end".into(),
                },
            })
            .await;
        assert_eq!(status(&f, "acct1").await, AccountStatus::LoggedIn);

        f.service
            .handle_event(AccountEvent {
                account_id: "acct1".into(),
                event: ClientEvent::LoggedOut,
            })
            .await;
        assert_eq!(status(&f, "acct1").await, AccountStatus::Disconnected);

        // Unknown accounts are ignored.
        f.service
            .handle_event(AccountEvent {
                account_id: "ghost".into(),
                event: ClientEvent::LoggedOut,
            })
            .await;
    }

    #[tokio::test]
    async fn test_event_loop_applies_client_events() {
        let f = fixture().await;
        f.service.create("acct1").await.unwrap();

        f.client("acct1")
            .emit(ClientEvent::PairSuccess(identity()));

        let mut applied = false;
        for _ in 0..100 {
            if status(&f, "acct1").await == AccountStatus::LoggedIn {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(applied);
    }

    #[tokio::test]
    async fn test_restore_sessions_reconnects_paired_accounts() {
        let f = fixture().await;
        f.store.create_account(&Account::new("paired")).await.unwrap();
        f.store.create_account(&Account::new("fresh")).await.unwrap();
        let store = DeviceStore::open(&f.dir.path().join("storages"), "paired", None)
            .await
            .unwrap();
        store.save_identity(&identity()).await.unwrap();

        let restored = f.service.restore_sessions().await.unwrap();
        assert_eq!(restored, 2);
        assert!(f.service.registry().contains("fresh").await);

        let mut reconnected = false;
        for _ in 0..100 {
            if status(&f, "paired").await == AccountStatus::Connected {
                reconnected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reconnected);
        assert!(f.client("paired").is_connected());
        assert_eq!(f.client("fresh").connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_everything() {
        let f = fixture().await;
        f.service.create("a").await.unwrap();
        f.service.create("b").await.unwrap();
        f.client("a").connect_now();

        f.service.shutdown().await;

        assert!(f.service.registry().is_empty().await);
        assert!(!f.client("a").is_connected());
        assert_eq!(f.client("b").disconnect_calls(), 1);
    }
}
