//! [`WhatsAppClient`] backed by the sidecar process.
//!
//! All accounts share one WebSocket. The [`SidecarHub`] owns it, correlates
//! requests with their `result` frames by request id, and routes
//! account-scoped frames to the right [`AccountLink`].

use std::{
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, anyhow, bail},
    async_trait::async_trait,
    dashmap::DashMap,
    tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot},
    tracing::{debug, info, warn},
};

use crate::{
    client::{
        AccountEvent, AuthEvent, ClientEvent, ClientFactory, DeviceIdentity, EventSender,
        WhatsAppClient,
    },
    device_store::DeviceStore,
    sidecar::{MessageCallback, SidecarHandle, connect_with_retry},
    types::{GatewayMessage, SidecarMessage},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reply to a gateway request.
#[derive(Debug, Clone)]
pub struct SidecarReply {
    pub code: Option<String>,
}

/// Per-account state mirrored from sidecar frames.
pub struct AccountLink {
    account_id: String,
    connected: AtomicBool,
    identity: Mutex<Option<DeviceIdentity>>,
    auth_tx: Mutex<Option<mpsc::Sender<AuthEvent>>>,
    events: EventSender,
    store: Arc<DeviceStore>,
}

impl AccountLink {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(AccountEvent {
            account_id: self.account_id.clone(),
            event,
        });
    }

    fn auth(&self, event: AuthEvent) {
        let tx = lock(&self.auth_tx).clone();
        if let Some(tx) = tx
            && tx.try_send(event).is_err()
        {
            debug!(account_id = %self.account_id, "auth event dropped, no active listener");
        }
    }

    fn set_identity(&self, identity: Option<DeviceIdentity>) {
        *lock(&self.identity) = identity.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let result = match &identity {
                Some(identity) => store.save_identity(identity).await,
                None => store.clear_identity().await,
            };
            if let Err(e) = result {
                warn!(
                    account_id = store.account_id(),
                    error = %e,
                    "failed to persist device identity"
                );
            }
        });
    }
}

/// Shared connection to the sidecar, established on first use.
pub struct SidecarHub {
    port: u16,
    device_name: String,
    handle: AsyncMutex<Option<SidecarHandle>>,
    pending: DashMap<String, oneshot::Sender<Result<SidecarReply, String>>>,
    links: DashMap<String, Arc<AccountLink>>,
}

impl SidecarHub {
    pub fn new(port: u16, device_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            port,
            device_name: device_name.into(),
            handle: AsyncMutex::new(None),
            pending: DashMap::new(),
            links: DashMap::new(),
        })
    }

    async fn connection(self: &Arc<Self>) -> Result<SidecarHandle> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref()
            && handle.is_connected()
        {
            return Ok(handle.clone());
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let on_message: MessageCallback = Arc::new(move |msg| {
            if let Some(hub) = weak.upgrade() {
                hub.dispatch(msg);
            }
        });
        let (handle, closed) =
            connect_with_retry(self.port, on_message, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY)
                .await?;

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let _ = closed.await;
            if let Some(hub) = weak.upgrade() {
                hub.connection_lost();
            }
        });

        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Send a request and wait for its `result` frame.
    pub async fn request(self: &Arc<Self>, msg: GatewayMessage) -> Result<SidecarReply> {
        let handle = self.connection().await?;
        let request_id = msg.request_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if let Err(e) = handle.send(msg).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(error))) => Err(anyhow!(error)),
            Ok(Err(_)) => bail!("sidecar connection lost"),
            Err(_) => {
                self.pending.remove(&request_id);
                bail!("sidecar request timed out")
            },
        }
    }

    fn link(&self, account_id: &str) -> Option<Arc<AccountLink>> {
        self.links.get(account_id).map(|l| Arc::clone(l.value()))
    }

    /// Route one inbound frame.
    pub fn dispatch(&self, msg: SidecarMessage) {
        match msg {
            SidecarMessage::Result {
                request_id,
                success,
                code,
                error,
            } => {
                let Some((_, tx)) = self.pending.remove(&request_id) else {
                    debug!(request_id = %request_id, "result for unknown request");
                    return;
                };
                let reply = if success {
                    Ok(SidecarReply { code })
                } else {
                    Err(error.unwrap_or_else(|| "sidecar request failed".into()))
                };
                let _ = tx.send(reply);
            },
            SidecarMessage::Qr {
                account_id,
                qr,
                timeout_secs,
            } => {
                if let Some(link) = self.link(&account_id) {
                    link.auth(AuthEvent::Code {
                        code: qr,
                        timeout: Duration::from_secs(timeout_secs),
                    });
                }
            },
            SidecarMessage::PairSuccess { account_id, jid } => {
                if let Some(link) = self.link(&account_id) {
                    let identity = DeviceIdentity::from_jid(&jid);
                    info!(account_id = %account_id, jid = %jid, "device paired");
                    link.set_identity(Some(identity.clone()));
                    link.auth(AuthEvent::Success(identity.clone()));
                    link.emit(ClientEvent::PairSuccess(identity));
                }
            },
            SidecarMessage::Connected { account_id, jid } => {
                if let Some(link) = self.link(&account_id) {
                    link.connected.store(true, Ordering::SeqCst);
                    if let Some(jid) = jid {
                        *lock(&link.identity) = Some(DeviceIdentity::from_jid(&jid));
                    }
                    link.emit(ClientEvent::Connected);
                }
            },
            SidecarMessage::Disconnected { account_id, reason } => {
                if let Some(link) = self.link(&account_id) {
                    link.connected.store(false, Ordering::SeqCst);
                    link.emit(ClientEvent::Disconnected { reason });
                }
            },
            SidecarMessage::LoggedOut { account_id } => {
                if let Some(link) = self.link(&account_id) {
                    link.connected.store(false, Ordering::SeqCst);
                    link.set_identity(None);
                    link.emit(ClientEvent::LoggedOut);
                }
            },
            SidecarMessage::Error { account_id, error } => {
                warn!(account_id = account_id.as_deref(), error = %error, "sidecar reported an error");
            },
        }
    }

    /// Every account loses its transport together with the sidecar.
    fn connection_lost(&self) {
        warn!("sidecar connection lost");
        self.pending.clear();
        for link in self.links.iter() {
            if link.connected.swap(false, Ordering::SeqCst) {
                link.emit(ClientEvent::Disconnected {
                    reason: "sidecar connection lost".into(),
                });
            }
        }
    }
}

/// One account's view of the shared sidecar.
pub struct SidecarClient {
    account_id: String,
    hub: Arc<SidecarHub>,
    link: Arc<AccountLink>,
}

impl Drop for SidecarClient {
    fn drop(&mut self) {
        // A newer client for the same id may already own the slot.
        let removed = self
            .hub
            .links
            .remove_if(&self.account_id, |_, link| Arc::ptr_eq(link, &self.link));
        if removed.is_some() {
            debug!(account_id = %self.account_id, "sidecar link released");
        }
    }
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl WhatsAppClient for SidecarClient {
    async fn connect(&self) -> Result<()> {
        let store = &self.link.store;
        self.hub
            .request(GatewayMessage::Connect {
                account_id: self.account_id.clone(),
                request_id: request_id(),
                auth_dir: store.dir().display().to_string(),
                keys_dir: store.keys_dir().map(|p| p.display().to_string()),
            })
            .await
            .context("sidecar connect failed")?;
        self.link.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let result = self
            .hub
            .request(GatewayMessage::Disconnect {
                account_id: self.account_id.clone(),
                request_id: request_id(),
            })
            .await;
        if let Err(e) = result {
            debug!(account_id = %self.account_id, error = %e, "sidecar disconnect failed");
        }
        self.link.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        lock(&self.link.identity).is_some()
    }

    async fn auth_events(&self) -> Result<mpsc::Receiver<AuthEvent>> {
        let (tx, rx) = mpsc::channel(8);
        *lock(&self.link.auth_tx) = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, phone_number: &str) -> Result<String> {
        if !self.is_connected() {
            bail!("client is not connected");
        }
        let reply = self
            .hub
            .request(GatewayMessage::PairPhone {
                account_id: self.account_id.clone(),
                request_id: request_id(),
                phone_number: phone_number.to_string(),
                client_name: self.hub.device_name.clone(),
            })
            .await
            .context("sidecar pair_phone failed")?;
        reply.code.context("sidecar returned no pairing code")
    }

    async fn logout(&self) -> Result<()> {
        self.hub
            .request(GatewayMessage::Logout {
                account_id: self.account_id.clone(),
                request_id: request_id(),
            })
            .await
            .context("sidecar logout failed")?;
        self.link.connected.store(false, Ordering::SeqCst);
        self.link.set_identity(None);
        Ok(())
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        lock(&self.link.identity).clone()
    }
}

/// Builds [`SidecarClient`]s sharing one [`SidecarHub`].
pub struct SidecarClientFactory {
    hub: Arc<SidecarHub>,
}

impl SidecarClientFactory {
    pub fn new(port: u16, device_name: impl Into<String>) -> Self {
        Self {
            hub: SidecarHub::new(port, device_name),
        }
    }

    pub fn hub(&self) -> &Arc<SidecarHub> {
        &self.hub
    }
}

#[async_trait]
impl ClientFactory for SidecarClientFactory {
    async fn create(
        &self,
        account_id: &str,
        store: Arc<DeviceStore>,
        events: EventSender,
    ) -> Result<Arc<dyn WhatsAppClient>> {
        let identity = store
            .load_identity()
            .await
            .with_context(|| format!("failed to load device identity for {account_id}"))?;
        let link = Arc::new(AccountLink {
            account_id: account_id.to_string(),
            connected: AtomicBool::new(false),
            identity: Mutex::new(identity),
            auth_tx: Mutex::new(None),
            events,
            store,
        });
        self.hub
            .links
            .insert(account_id.to_string(), Arc::clone(&link));

        Ok(Arc::new(SidecarClient {
            account_id: account_id.to_string(),
            hub: Arc::clone(&self.hub),
            link,
        }))
    }
}
