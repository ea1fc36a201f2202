//! Receive side of a transfer: parse one frame, store it, verify, answer.
//!
//! ```text
//! Accepted → ReadSize → ReadDigest → ReadPayload → Verify → Respond → Closed
//! ```
//!
//! Any error before `Respond` ends the connection without a verdict and leaves
//! no payload or sidecar behind. A digest mismatch is not an error: the stored
//! pair is removed and the negative verdict is sent.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::hasher;
use super::store::{PendingFiles, ReceiveStore};
use super::types::{
    FrameHeader, Phase, TransferError, VerificationResult, DIGEST_FIELD_LEN, SIZE_FIELD_LEN,
};

/// Handles incoming frames against a [`ReceiveStore`].
#[derive(Debug, Clone)]
pub struct Receiver {
    store: ReceiveStore,
    /// Largest accepted payload in bytes; `0` means unlimited.
    max_file_size: u64,
}

impl Receiver {
    pub fn new(store: ReceiveStore, max_file_size: u64) -> Self {
        Self {
            store,
            max_file_size,
        }
    }

    pub fn store(&self) -> &ReceiveStore {
        &self.store
    }

    /// Run one connection through the state machine.
    ///
    /// Returns the comparison outcome once the verdict line has been written.
    pub async fn handle<S>(&self, stream: &mut S) -> Result<VerificationResult, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut phase = Phase::Accepted;
        let result = self.run(stream, &mut phase).await;
        if let Err(e) = &result {
            warn!(phase = phase.as_str(), "Transfer aborted: {e}");
        }
        result
    }

    async fn run<S>(
        &self,
        stream: &mut S,
        phase: &mut Phase,
    ) -> Result<VerificationResult, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        *phase = Phase::ReadSize;
        let file_size = u64::from_be_bytes(read_field::<_, SIZE_FIELD_LEN>(stream, "size").await?);
        if self.max_file_size > 0 && file_size > self.max_file_size {
            return Err(TransferError::TooLarge {
                size: file_size,
                max: self.max_file_size,
            });
        }

        *phase = Phase::ReadDigest;
        let claimed_digest = read_field::<_, DIGEST_FIELD_LEN>(stream, "digest").await?;
        let header = FrameHeader {
            file_size,
            claimed_digest,
        };
        debug!(file_size, claimed = %header.claimed_str(), "Header received");

        *phase = Phase::ReadPayload;
        let paths = self.store.allocate();
        let pending = PendingFiles::new(paths.clone());
        self.store
            .write_payload(stream, header.file_size, &paths)
            .await?;
        self.store
            .write_sidecar(&paths, &header.claimed_digest)
            .await?;
        info!(name = %paths.name, file_size, "Saved file");

        *phase = Phase::Verify;
        let computed = match hasher::hash_file(&paths.payload).await {
            Ok(digest) => digest,
            Err(e) => {
                self.store.remove_pair(&paths).await;
                return Err(e.into());
            }
        };
        let result =
            VerificationResult::compare(computed, &header.claimed_digest, paths.name.clone());

        *phase = Phase::Respond;
        if result.accepted {
            pending.keep();
            info!(
                name = %result.name,
                digest = %result.computed_digest,
                "File integrity verified"
            );
        } else {
            warn!(
                name = %result.name,
                computed = %result.computed_digest,
                claimed = %result.claimed_digest,
                "File integrity not verified"
            );
            if self.store.remove_pair(&paths).await {
                debug!(name = %result.name, "Removed rejected file and digest");
            }
            drop(pending);
        }

        let line = format!("{}\n", result.verdict());
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        *phase = Phase::Closed;
        let _ = stream.shutdown().await;
        Ok(result)
    }
}

/// Read exactly `N` bytes. EOF partway through is a framing error.
async fn read_field<R, const N: usize>(
    reader: &mut R,
    field: &'static str,
) -> Result<[u8; N], TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransferError::Framing { field })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::Verdict;
    use std::path::Path;
    use tokio::io::duplex;

    fn receiver_in(dir: &Path, max_file_size: u64) -> Receiver {
        Receiver::new(
            ReceiveStore::new(dir.join("files"), dir.join("md5")),
            max_file_size,
        )
    }

    fn count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn frame(payload: &[u8], digest: &str) -> Vec<u8> {
        let header = FrameHeader::new(payload.len() as u64, digest).unwrap();
        let mut out = header.encode().to_vec();
        out.extend_from_slice(payload);
        out
    }

    /// Feed `input` to the receiver, close the write half, collect the reply.
    async fn exchange(
        receiver: &Receiver,
        input: Vec<u8>,
    ) -> (Result<VerificationResult, TransferError>, Vec<u8>) {
        let (mut client, mut server) = duplex(256 * 1024);
        let client_task = tokio::spawn(async move {
            client.write_all(&input).await.unwrap();
            client.shutdown().await.unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            reply
        });
        let result = receiver.handle(&mut server).await;
        drop(server);
        let reply = client_task.await.unwrap();
        (result, reply)
    }

    #[tokio::test]
    async fn matching_digest_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let payload = b"The quick brown fox jumps over the lazy dog";
        let digest = "9e107d9d372bb6826bd81d3542a419d6";
        let (result, reply) = exchange(&receiver, frame(payload, digest)).await;

        let result = result.unwrap();
        assert!(result.accepted);
        assert_eq!(result.verdict(), Verdict::Verified);
        assert_eq!(reply, b"File integrity verified.\n");

        let stored = receiver
            .store()
            .payload_dir()
            .join(format!("{}.txt", result.name));
        let sidecar = receiver
            .store()
            .digest_dir()
            .join(format!("[md5]{}.txt", result.name));
        assert_eq!(std::fs::read(stored).unwrap(), payload);
        assert_eq!(std::fs::read(sidecar).unwrap(), digest.as_bytes());
        assert_eq!(count(receiver.store().payload_dir()), 1);
        assert_eq!(count(receiver.store().digest_dir()), 1);
    }

    #[tokio::test]
    async fn mismatched_digest_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) = exchange(
            &receiver,
            frame(b"abd", "900150983cd24fb0d6963f7d28e17f72"),
        )
        .await;

        let result = result.unwrap();
        assert!(!result.accepted);
        assert_eq!(result.claimed_digest, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(reply, b"File integrity not verified.\n");
        assert_eq!(count(receiver.store().payload_dir()), 0);
        assert_eq!(count(receiver.store().digest_dir()), 0);
    }

    #[tokio::test]
    async fn uppercase_claim_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) = exchange(
            &receiver,
            frame(b"abc", "900150983CD24FB0D6963F7D28E17F72"),
        )
        .await;
        assert!(!result.unwrap().accepted);
        assert_eq!(reply, b"File integrity not verified.\n");
    }

    #[tokio::test]
    async fn empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) =
            exchange(&receiver, frame(b"", "d41d8cd98f00b204e9800998ecf8427e")).await;
        assert!(result.unwrap().accepted);
        assert_eq!(reply, b"File integrity verified.\n");
    }

    #[tokio::test]
    async fn size_only_frame_aborts_silently() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) = exchange(&receiver, 5u64.to_be_bytes().to_vec()).await;
        assert!(matches!(
            result,
            Err(TransferError::Framing { field: "digest" })
        ));
        assert!(reply.is_empty());
        assert_eq!(count(receiver.store().payload_dir()), 0);
        assert_eq!(count(receiver.store().digest_dir()), 0);
    }

    #[tokio::test]
    async fn partial_size_field() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) = exchange(&receiver, vec![0, 0, 0]).await;
        assert!(matches!(result, Err(TransferError::Framing { field: "size" })));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn short_payload_aborts_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 0);
        receiver.store().ensure_dirs().await.unwrap();

        let mut input = frame(b"abcdef", "e80b5017098950fc58aad83c8c14978e");
        input.truncate(input.len() - 2);
        let (result, reply) = exchange(&receiver, input).await;

        assert!(matches!(
            result,
            Err(TransferError::Framing { field: "payload" })
        ));
        assert!(reply.is_empty());
        assert_eq!(count(receiver.store().payload_dir()), 0);
        assert_eq!(count(receiver.store().digest_dir()), 0);
    }

    #[tokio::test]
    async fn oversized_frame_rejected_when_capped() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_in(dir.path(), 4);
        receiver.store().ensure_dirs().await.unwrap();

        let (result, reply) = exchange(
            &receiver,
            frame(b"abcdef", "e80b5017098950fc58aad83c8c14978e"),
        )
        .await;
        assert!(matches!(
            result,
            Err(TransferError::TooLarge { size: 6, max: 4 })
        ));
        assert!(reply.is_empty());
        assert_eq!(count(receiver.store().payload_dir()), 0);
    }
}
