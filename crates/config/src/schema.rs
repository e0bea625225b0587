//! Config schema types (server, storage, whatsapp, login).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WahubConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub whatsapp: WhatsAppConfig,
    pub login: LoginConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token required on every `/accounts` request. `WAHUB_TOKEN`
    /// takes precedence when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
            api_token: None,
        }
    }
}

/// Where account metadata and per-account credentials live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for `storages/` and the accounts database. Defaults to `~/.wahub/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// SQLite URL for the accounts database. Defaults to
    /// `sqlite://<data_dir>/accounts.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Optional separate root for per-account key material. When unset, keys
    /// live next to the rest of the account's device credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys_dir: Option<PathBuf>,
}

/// WhatsApp protocol sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Port of the local WebSocket sidecar speaking the WhatsApp Web protocol.
    pub sidecar_port: u16,

    /// Directory where rendered login QR codes are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_dir: Option<PathBuf>,

    /// Client name shown on the phone's linked-devices list when pairing by code.
    pub device_name: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_port: 9876,
            qr_dir: None,
            device_name: "Chrome (Linux)".into(),
        }
    }
}

/// Login flow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Upper bound on the QR login wait, in seconds.
    pub timeout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl WahubConfig {
    /// Resolved data directory (`storage.data_dir` or the default).
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(crate::loader::data_dir)
    }

    /// Directory holding one credential store per account.
    pub fn storages_dir(&self) -> PathBuf {
        self.data_dir().join("storages")
    }

    pub fn qr_dir(&self) -> PathBuf {
        self.whatsapp
            .qr_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("qrcode"))
    }

    pub fn database_url(&self) -> String {
        self.storage.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", self.data_dir().join("accounts.db").display())
        })
    }
}
