//! QR challenge rendering.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Context, Result},
    image::Luma,
    qrcode::{EcLevel, QrCode},
    tracing::debug,
};

const MIN_DIMENSION: u32 = 512;

/// Writes QR challenges as PNG files under one directory.
#[derive(Debug, Clone)]
pub struct QrRenderer {
    dir: PathBuf,
}

impl QrRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode `code` and write it to `scan-<account>-<unix seconds>-<nonce>.png`.
    /// The nonce keeps two renders within the same second apart.
    pub async fn render(&self, account_id: &str, code: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .dir
            .join(format!("scan-{account_id}-{stamp}-{}.png", &nonce[..8]));

        let code = code.to_string();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)
                .context("failed to encode QR code")?;
            qr.render::<Luma<u8>>()
                .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
                .build()
                .save(&target)
                .with_context(|| format!("failed to write {}", target.display()))
        })
        .await
        .context("QR render task panicked")??;

        debug!(account_id, path = %path.display(), "rendered QR code");
        Ok(path)
    }

    /// Resolve a file name served back to clients. Rejects anything that is
    /// not a bare file name.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let bare = Path::new(file_name).file_name()?;
        (bare == file_name && file_name.ends_with(".png")).then(|| self.dir.join(bare))
    }
}
