//! File transfer with integrity verification.
//!
//! One frame per TCP connection: an 8-byte size, the 32-character hex MD5 the
//! sender computed, then the payload. The receiver stores the payload, hashes
//! it again, and answers with a single verdict line. See [`types`] for the
//! wire layout.
//!
//! The module knows nothing about listeners or configuration. [`crate::server`]
//! drives [`Receiver`] over accepted sockets, and the CLI calls [`sender`].

pub mod hasher;
pub mod receiver;
pub mod sender;
pub mod store;
pub mod types;

pub use receiver::Receiver;
pub use store::{PendingFiles, ReceiveStore, StoredPaths};
pub use types::{FrameHeader, Phase, TransferError, VerificationResult, Verdict};
