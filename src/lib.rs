#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! md5fic: file integrity check over TCP.
//!
//! A sender hashes a file with MD5 and ships `{size, hex digest, payload}` to a
//! receiver, which stores the file, hashes it again and answers with a one-line
//! verdict. Mismatched files are deleted.
//!
//! - `md5`: streaming MD5 engine and block compression function
//! - `transfer`: wire types, receive state machine, sender, on-disk store
//! - `server`: TCP accept loop, one task per connection
//! - `config`: TOML + env-var configuration
//! - `util`: path helpers
//!
//! MD5 detects accidental corruption only. Nothing here authenticates the
//! sender or protects the data in transit.

pub mod config;
pub mod md5;
pub mod server;
pub mod transfer;
pub mod util;

pub use config::Config;
pub use md5::{digest_of, Md5};
pub use transfer::{Receiver, ReceiveStore, Verdict, VerificationResult};
