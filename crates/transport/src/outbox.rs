//! Local outbox directory transport.
//!
//! Each message is written to `<root>/<partner remote path>/<file name>`.
//! The file first lands under a hidden temporary name and is then renamed,
//! so a pickup process never sees a partially written message.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use codeco::{DeliveryId, OutboundMessage, Transport, TransportError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Writes messages into a local directory tree.
#[derive(Debug, Clone)]
pub struct OutboxTransport {
    root: PathBuf,
}

impl OutboxTransport {
    /// Creates a transport rooted at `root`. The directory is created on
    /// first delivery.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Outbox root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path of `message`.
    ///
    /// Fails when the remote path tries to escape the outbox root.
    pub fn target_path(&self, message: &OutboundMessage) -> Result<PathBuf, TransportError> {
        let remote = Path::new(message.partner.remote_path.trim_start_matches(['/', '\\']));
        let mut dir = self.root.clone();
        for component in remote.components() {
            match component {
                Component::Normal(part) => dir.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(TransportError::Configuration(format!(
                        "remote path '{}' of partner {} leaves the outbox",
                        message.partner.remote_path, message.partner.partner_code
                    )))
                }
            }
        }
        Ok(dir.join(&message.file_name))
    }
}

fn io_error(path: &Path, error: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError> {
        let target = self.target_path(message)?;
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let temporary = dir.join(format!(".{}.part", message.file_name));
        let mut file = tokio::fs::File::create(&temporary)
            .await
            .map_err(|e| io_error(&temporary, e))?;
        file.write_all(message.payload.as_bytes())
            .await
            .map_err(|e| io_error(&temporary, e))?;
        file.sync_all().await.map_err(|e| io_error(&temporary, e))?;
        drop(file);
        debug!(path = %temporary.display(), "Wrote temporary outbox file");

        tokio::fs::rename(&temporary, &target)
            .await
            .map_err(|e| io_error(&target, e))?;

        info!(
            transmission_id = %message.transmission_id,
            partner_code = %message.partner.partner_code,
            path = %target.display(),
            "Message written to outbox"
        );

        DeliveryId::new(target.display().to_string())
            .ok_or_else(|| TransportError::Configuration("empty outbox path".to_string()))
    }
}
