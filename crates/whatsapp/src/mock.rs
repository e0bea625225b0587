//! Scriptable in-process client for tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::sync::mpsc,
};

use crate::{
    client::{
        AccountEvent, AuthEvent, ClientEvent, ClientFactory, DeviceIdentity, EventSender,
        WhatsAppClient,
    },
    device_store::DeviceStore,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Client whose auth flow is driven by a script instead of the network.
///
/// Events queued with [`MockClient::script_auth`] are delivered to the current
/// auth subscriber when `connect` runs. With an empty script the channel
/// stays open and silent, which is how a login timeout is simulated.
#[derive(Default)]
pub struct MockClient {
    connected: AtomicBool,
    logged_in: AtomicBool,
    fail_connect: AtomicBool,
    close_auth_on_connect: AtomicBool,
    identity: Mutex<Option<DeviceIdentity>>,
    script: Mutex<Vec<AuthEvent>>,
    auth_tx: Mutex<Option<mpsc::Sender<AuthEvent>>>,
    events: Mutex<Option<(String, EventSender)>>,
    disconnect_delay: Mutex<Option<Duration>>,
    pair_code: Mutex<String>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        let client = Self::default();
        *lock(&client.pair_code) = "ABCD-EFGH".into();
        client
    }

    /// A client restored from a paired device.
    pub fn logged_in(identity: DeviceIdentity) -> Self {
        let client = Self::new();
        client.set_identity(Some(identity));
        client
    }

    pub fn set_identity(&self, identity: Option<DeviceIdentity>) {
        self.logged_in.store(identity.is_some(), Ordering::SeqCst);
        *lock(&self.identity) = identity;
    }

    pub fn script_auth(&self, events: impl IntoIterator<Item = AuthEvent>) {
        lock(&self.script).extend(events);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        *lock(&self.disconnect_delay) = Some(delay);
    }

    pub fn set_pair_code(&self, code: &str) {
        *lock(&self.pair_code) = code.to_string();
    }

    /// Mark the transport as up without going through `connect`.
    pub fn connect_now(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Drop the auth sender, closing the subscriber's channel.
    pub fn close_auth(&self) {
        lock(&self.auth_tx).take();
    }

    /// Close the auth channel right after `connect` delivers the script.
    pub fn set_close_auth_on_connect(&self, close: bool) {
        self.close_auth_on_connect.store(close, Ordering::SeqCst);
    }

    /// Report a lifecycle event as the account's client would.
    pub fn emit(&self, event: ClientEvent) {
        if let Some((account_id, tx)) = lock(&self.events).as_ref() {
            let _ = tx.send(AccountEvent {
                account_id: account_id.clone(),
                event,
            });
        }
    }

    fn attach(&self, account_id: &str, events: EventSender) {
        *lock(&self.events) = Some((account_id.to_string(), events));
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WhatsAppClient for MockClient {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.connected.store(true, Ordering::SeqCst);

        let script: Vec<AuthEvent> = lock(&self.script).drain(..).collect();
        let tx = lock(&self.auth_tx).clone();
        for event in script {
            if let AuthEvent::Success(identity) = &event {
                self.set_identity(Some(identity.clone()));
            }
            if let Some(tx) = &tx {
                let _ = tx.try_send(event);
            }
        }
        drop(tx);
        if self.close_auth_on_connect.load(Ordering::SeqCst) {
            self.close_auth();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let delay = *lock(&self.disconnect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn auth_events(&self) -> Result<mpsc::Receiver<AuthEvent>> {
        let (tx, rx) = mpsc::channel(16);
        *lock(&self.auth_tx) = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, _phone_number: &str) -> Result<String> {
        if !self.is_connected() {
            bail!("client is not connected");
        }
        Ok(lock(&self.pair_code).clone())
    }

    async fn logout(&self) -> Result<()> {
        if !self.is_logged_in() {
            bail!("client is not logged in");
        }
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.set_identity(None);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        lock(&self.identity).clone()
    }
}

/// Factory handing out [`MockClient`]s.
///
/// A client built on a store that already holds a device identity starts
/// logged in, mirroring a restart with persisted credentials.
#[derive(Default)]
pub struct MockClientFactory {
    fail: AtomicBool,
    prepared: Mutex<HashMap<String, Arc<MockClient>>>,
    created: Mutex<HashMap<String, Arc<MockClient>>>,
    create_calls: AtomicUsize,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hand out `client` the next time `account_id` is built.
    pub fn prepare(&self, account_id: &str, client: Arc<MockClient>) {
        lock(&self.prepared).insert(account_id.to_string(), client);
    }

    /// Most recent client built for `account_id`.
    pub fn client(&self, account_id: &str) -> Option<Arc<MockClient>> {
        lock(&self.created).get(account_id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn create(
        &self,
        account_id: &str,
        store: Arc<DeviceStore>,
        events: EventSender,
    ) -> Result<Arc<dyn WhatsAppClient>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("client construction failed");
        }

        let prepared = lock(&self.prepared).remove(account_id);
        let client = match prepared {
            Some(client) => client,
            None => {
                let client = Arc::new(MockClient::new());
                client.set_identity(store.load_identity().await?);
                client
            },
        };
        client.attach(account_id, events);
        lock(&self.created).insert(account_id.to_string(), Arc::clone(&client));
        Ok(client)
    }
}
