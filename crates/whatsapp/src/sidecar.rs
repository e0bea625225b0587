//! WebSocket transport to the WhatsApp Web sidecar.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result},
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, error, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Default sidecar WebSocket port.
pub const DEFAULT_SIDECAR_PORT: u16 = 9876;

/// Write half of a sidecar connection.
#[derive(Clone)]
pub struct SidecarHandle {
    tx: mpsc::Sender<GatewayMessage>,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub async fn send(&self, msg: GatewayMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .context("sidecar connection is closed")
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// Invoked on the reader task for every frame the sidecar sends.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// Connect to the sidecar on localhost and spawn the reader and writer tasks.
///
/// The returned receiver fires once the connection is gone.
pub async fn connect_to_sidecar(
    port: u16,
    on_message: MessageCallback,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let url = format!("ws://127.0.0.1:{port}");
    info!(url = %url, "connecting to WhatsApp sidecar");

    let (ws_stream, _) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to sidecar at {url}"))?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(32);
    let (closed_tx, closed_rx) = oneshot::channel();
    let connected = Arc::new(AtomicBool::new(true));

    let reader_connected = Arc::clone(&connected);
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<SidecarMessage>(&text) {
                    Ok(msg) => {
                        debug!(?msg, "sidecar frame");
                        on_message(msg);
                    },
                    Err(e) => warn!(error = %e, text = %text, "unparseable sidecar frame"),
                },
                Ok(Message::Close(_)) => {
                    info!("sidecar closed the connection");
                    break;
                },
                Ok(_) => {},
                Err(e) => {
                    error!(error = %e, "sidecar read error");
                    break;
                },
            }
        }
        reader_connected.store(false, Ordering::SeqCst);
        let _ = closed_tx.send(());
    });

    let writer_connected = Arc::clone(&connected);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to serialize sidecar request");
                    continue;
                },
            };
            if let Err(e) = write.send(Message::Text(json.into())).await {
                error!(error = %e, "failed to write to sidecar");
                break;
            }
        }
        writer_connected.store(false, Ordering::SeqCst);
    });

    Ok((SidecarHandle { tx, connected }, closed_rx))
}

/// [`connect_to_sidecar`] with a fixed delay between attempts.
pub async fn connect_with_retry(
    port: u16,
    on_message: MessageCallback,
    max_attempts: u32,
    delay: Duration,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let mut attempt = 0;
    loop {
        match connect_to_sidecar(port, Arc::clone(&on_message)).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }
                warn!(attempt, max_attempts, error = %e, "sidecar not reachable, retrying");
                tokio::time::sleep(delay).await;
            },
        }
    }
}
