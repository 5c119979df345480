//! # Downloads
//!
//! Resumable HTTP downloads into the scratch area. Finished files are handed
//! to the [`ContentVault`](crate::vault::ContentVault) by
//! [`DownloadLibrary::save_download`](crate::library::DownloadLibrary::save_download).

pub mod manager;
pub mod progress;

pub use manager::{sha256_hex, DownloadManager, LocalFile};
pub use progress::DownloadProgress;
