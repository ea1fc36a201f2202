//! On-disk layout for received files.
//!
//! Each accepted frame produces two files:
//!
//! - `<payload_dir>/<name>.txt`: the payload
//! - `<digest_dir>/[md5]<name>.txt`: the 32 claimed-digest bytes as received
//!
//! `<name>` is the hex MD5 of the receipt time in milliseconds, the process id
//! and a process-wide counter, so two connections finishing in the same
//! millisecond still get distinct names.
//!
//! Payloads are streamed into a hidden temp file in the payload directory and
//! renamed into place once complete. A reader never sees a partial payload.
//! The rename requires both paths to be on the same filesystem.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::types::{TransferError, DIGEST_FIELD_LEN};
use crate::md5;

/// Monotonic counter to uniquify stored names across concurrent connections.
static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Paths reserved for one connection.
#[derive(Debug, Clone)]
pub struct StoredPaths {
    pub name: String,
    pub payload: PathBuf,
    pub sidecar: PathBuf,
    pub temp: PathBuf,
}

/// The pair of directories received files are written to.
#[derive(Debug, Clone)]
pub struct ReceiveStore {
    payload_dir: PathBuf,
    digest_dir: PathBuf,
}

impl ReceiveStore {
    pub fn new(payload_dir: impl Into<PathBuf>, digest_dir: impl Into<PathBuf>) -> Self {
        Self {
            payload_dir: payload_dir.into(),
            digest_dir: digest_dir.into(),
        }
    }

    pub fn payload_dir(&self) -> &Path {
        &self.payload_dir
    }

    pub fn digest_dir(&self) -> &Path {
        &self.digest_dir
    }

    /// Create both directories (and parents) if missing.
    pub async fn ensure_dirs(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.payload_dir).await?;
        tokio::fs::create_dir_all(&self.digest_dir).await?;
        Ok(())
    }

    /// Reserve a fresh name and derive the paths for it.
    pub fn allocate(&self) -> StoredPaths {
        let name = unique_name();
        StoredPaths {
            payload: self.payload_dir.join(format!("{name}.txt")),
            sidecar: self.digest_dir.join(format!("[md5]{name}.txt")),
            temp: self.payload_dir.join(format!(".rx_tmp_{name}")),
            name,
        }
    }

    /// Stream exactly `len` bytes from `reader` into `paths.payload`.
    ///
    /// Bytes land in `paths.temp` first. On a short read or I/O error the temp
    /// file is removed and nothing is left behind.
    pub async fn write_payload<R>(
        &self,
        reader: &mut R,
        len: u64,
        paths: &StoredPaths,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let result = stream_to_file(reader, len, &paths.temp).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&paths.temp).await;
            return Err(e);
        }

        if let Err(source) = tokio::fs::rename(&paths.temp, &paths.payload).await {
            let _ = tokio::fs::remove_file(&paths.temp).await;
            return Err(TransferError::Persist {
                path: paths.payload.clone(),
                source,
            });
        }
        debug!(path = %paths.payload.display(), len, "Payload stored");
        Ok(())
    }

    /// Write the claimed digest next to a stored payload.
    ///
    /// If this fails the payload is removed as well, so a payload never exists
    /// without its sidecar.
    pub async fn write_sidecar(
        &self,
        paths: &StoredPaths,
        claimed: &[u8; DIGEST_FIELD_LEN],
    ) -> Result<(), TransferError> {
        if let Err(source) = tokio::fs::write(&paths.sidecar, claimed).await {
            let _ = tokio::fs::remove_file(&paths.payload).await;
            return Err(TransferError::Persist {
                path: paths.sidecar.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Best-effort removal of a payload and its sidecar.
    ///
    /// Returns `true` if both are gone afterwards. Failures are logged.
    pub async fn remove_pair(&self, paths: &StoredPaths) -> bool {
        let mut clean = true;
        for path in [&paths.payload, &paths.sidecar] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), "Failed to remove file: {e}");
                    clean = false;
                }
            }
        }
        clean
    }
}

/// Removes a connection's temp file, payload and sidecar when dropped, unless
/// [`PendingFiles::keep`] was called first.
///
/// Dropping the receive future mid-transfer (a connection aborted at shutdown)
/// runs this, so partial files never outlive their connection.
#[derive(Debug)]
pub struct PendingFiles {
    paths: Option<StoredPaths>,
}

impl PendingFiles {
    pub fn new(paths: StoredPaths) -> Self {
        Self { paths: Some(paths) }
    }

    /// Keep whatever is on disk.
    pub fn keep(mut self) {
        self.paths = None;
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        let Some(paths) = self.paths.take() else {
            return;
        };
        for path in [&paths.temp, &paths.payload, &paths.sidecar] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed unfinished file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove file: {e}"),
            }
        }
    }
}

/// Hex MD5 of `<unix-millis>-<pid>-<seq>`.
pub fn unique_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let seq = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = format!("{millis}-{}-{seq}", std::process::id());
    md5::hex_digest_of(stamp.as_bytes())
}

async fn stream_to_file<R>(reader: &mut R, len: u64, path: &Path) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| TransferError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

    #[allow(clippy::cast_possible_truncation)]
    let mut buf = vec![0u8; len.min(COPY_BUF_SIZE as u64) as usize];
    let mut remaining = len;
    while remaining > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::Framing { field: "payload" });
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|source| TransferError::Persist {
                path: path.to_path_buf(),
                source,
            })?;
        remaining -= n as u64;
    }

    file.flush().await.map_err(|source| TransferError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
