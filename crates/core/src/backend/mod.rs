//! Asset backend abstraction.
//!
//! This module provides the `AssetBackend` trait the patch pipeline drives
//! (package initialization, version lookup, manifest activation, downloads and
//! cache reclamation) and a `TransferQueue` backends can use to satisfy the
//! download contract.

mod transfer;
mod types;

pub use transfer::{FileFetcher, TransferFile, TransferQueue};
pub use types::*;
