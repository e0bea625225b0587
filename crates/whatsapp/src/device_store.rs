//! Per-account credential storage.
//!
//! Each account owns `<root>/whatsapp_<id>/`, handed to the protocol client
//! as its auth directory, plus a `device.json` snapshot of the linked device.
//! When a separate key root is configured, key material goes to
//! `<keys_root>/keys_<id>/` instead of the auth directory.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    tracing::debug,
};

use crate::client::DeviceIdentity;

const IDENTITY_FILE: &str = "device.json";

/// Storage handle for one account. Never shared between accounts.
#[derive(Debug)]
pub struct DeviceStore {
    account_id: String,
    dir: PathBuf,
    keys_dir: Option<PathBuf>,
}

impl DeviceStore {
    /// Deterministic on-disk location of an account's credential store.
    pub fn path_for(root: &Path, account_id: &str) -> PathBuf {
        root.join(format!("whatsapp_{account_id}"))
    }

    /// Deterministic location of an account's key store under `keys_root`.
    pub fn keys_path_for(keys_root: &Path, account_id: &str) -> PathBuf {
        keys_root.join(format!("keys_{account_id}"))
    }

    /// Create (or reopen) the store for `account_id`.
    pub async fn open(root: &Path, account_id: &str, keys_root: Option<&Path>) -> Result<Self> {
        anyhow::ensure!(
            !account_id.is_empty() && account_id.chars().all(|c| c.is_ascii_alphanumeric()),
            "invalid account id for device store: {account_id:?}"
        );

        let dir = Self::path_for(root, account_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let keys_dir = match keys_root {
            Some(keys_root) => {
                let keys_dir = Self::keys_path_for(keys_root, account_id);
                tokio::fs::create_dir_all(&keys_dir)
                    .await
                    .with_context(|| format!("failed to create {}", keys_dir.display()))?;
                Some(keys_dir)
            },
            None => None,
        };

        debug!(account_id, dir = %dir.display(), "opened device store");
        Ok(Self {
            account_id: account_id.to_string(),
            dir,
            keys_dir,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keys_dir(&self) -> Option<&Path> {
        self.keys_dir.as_deref()
    }

    /// Every on-disk artifact owned by this store.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.dir.clone()];
        paths.extend(self.keys_dir.clone());
        paths
    }

    pub async fn load_identity(&self) -> Result<Option<DeviceIdentity>> {
        let path = self.dir.join(IDENTITY_FILE);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let identity = serde_json::from_str(&data)
            .with_context(|| format!("corrupt device identity in {}", path.display()))?;
        Ok(Some(identity))
    }

    pub async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        let path = self.dir.join(IDENTITY_FILE);
        let data = serde_json::to_string_pretty(identity)?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub async fn clear_identity(&self) -> Result<()> {
        match tokio::fs::remove_file(self.dir.join(IDENTITY_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Move an account artifact away from its deterministic path, so a new
/// account with the same id starts from an empty store. Returns the new
/// location, or `None` when there was nothing to move.
pub async fn retire_artifact(path: &Path) -> Result<Option<PathBuf>> {
    let Some(name) = path.file_name() else {
        anyhow::bail!("not an artifact path: {}", path.display());
    };
    // Account ids are alphanumeric, so a dotted name never collides with a
    // live store.
    let mut retired = name.to_os_string();
    retired.push(format!(".deleted-{}", uuid::Uuid::new_v4().simple()));
    let target = path.with_file_name(retired);

    match tokio::fs::rename(path, &target).await {
        Ok(()) => {
            debug!(from = %path.display(), to = %target.display(), "artifact retired");
            Ok(Some(target))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to retire {}", path.display())),
    }
}

/// Remove an artifact left behind by a deleted account. Missing paths are
/// not an error.
pub async fn remove_artifact(path: &Path) -> Result<()> {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.with_context(|| format!("failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_deterministic_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(root.path(), "acct1", None).await.unwrap();

        assert_eq!(store.dir(), root.path().join("whatsapp_acct1"));
        assert!(store.dir().is_dir());
        assert!(store.keys_dir().is_none());
        assert_eq!(store.artifacts(), vec![root.path().join("whatsapp_acct1")]);
    }

    #[tokio::test]
    async fn test_separate_keys_root() {
        let root = tempfile::tempdir().unwrap();
        let keys = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(root.path(), "acct1", Some(keys.path()))
            .await
            .unwrap();

        let keys_dir = keys.path().join("keys_acct1");
        assert_eq!(store.keys_dir(), Some(keys_dir.as_path()));
        assert!(keys_dir.is_dir());
        assert_eq!(store.artifacts().len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let root = tempfile::tempdir().unwrap();
        assert!(DeviceStore::open(root.path(), "../x", None).await.is_err());
        assert!(DeviceStore::open(root.path(), "", None).await.is_err());
    }

    #[tokio::test]
    async fn test_stores_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let a = DeviceStore::open(root.path(), "a", None).await.unwrap();
        let b = DeviceStore::open(root.path(), "b", None).await.unwrap();

        a.save_identity(&DeviceIdentity::from_jid("111:1@s.whatsapp.net"))
            .await
            .unwrap();

        assert!(a.load_identity().await.unwrap().is_some());
        assert!(b.load_identity().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_save_load_clear() {
        let root = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(root.path(), "acct1", None).await.unwrap();
        assert!(store.load_identity().await.unwrap().is_none());

        let identity = DeviceIdentity::from_jid("628123456789:12@s.whatsapp.net");
        store.save_identity(&identity).await.unwrap();

        let reopened = DeviceStore::open(root.path(), "acct1", None).await.unwrap();
        assert_eq!(reopened.load_identity().await.unwrap(), Some(identity));

        reopened.clear_identity().await.unwrap();
        reopened.clear_identity().await.unwrap();
        assert!(reopened.load_identity().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retire_frees_the_account_path() {
        let root = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(root.path(), "acct1", None).await.unwrap();
        store
            .save_identity(&DeviceIdentity::from_jid("1@s.whatsapp.net"))
            .await
            .unwrap();

        let retired = retire_artifact(store.dir()).await.unwrap().unwrap();
        assert!(!store.dir().exists());
        assert!(retired.join(IDENTITY_FILE).is_file());
        let name = retired.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("whatsapp_acct1.deleted-"));

        // Reopening yields a fresh, empty store.
        let reopened = DeviceStore::open(root.path(), "acct1", None).await.unwrap();
        assert!(reopened.load_identity().await.unwrap().is_none());

        remove_artifact(&retired).await.unwrap();
        assert!(reopened.dir().is_dir());
        assert!(retire_artifact(&root.path().join("whatsapp_ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_artifact() {
        let root = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(root.path(), "acct1", None).await.unwrap();
        store
            .save_identity(&DeviceIdentity::from_jid("1@s.whatsapp.net"))
            .await
            .unwrap();

        remove_artifact(store.dir()).await.unwrap();
        assert!(!store.dir().exists());
        // Second removal is a no-op.
        remove_artifact(store.dir()).await.unwrap();
    }
}
