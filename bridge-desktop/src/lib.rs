//! # Desktop Bridges
//!
//! Bridge implementations for macOS, Windows and Linux hosts.
//!
//! | Trait | Type | Backed by |
//! |-------|------|-----------|
//! | `HttpClient` | [`ReqwestHttpClient`] | `reqwest`, streamed ranged downloads |
//! | `FileSystemAccess` | [`TokioFileSystem`] | `tokio::fs`, roots from `dirs` |
//! | `KeyValueStore` | [`SqliteKeyValueStore`] | one SQLite table via `sqlx` |
//! | `NetworkMonitor` | [`DesktopNetworkMonitor`] | TCP reachability of the API host |
//! | `PowerMonitor` | [`DesktopPowerMonitor`] | `/sys/class/power_supply` on Linux |
//!
//! `core_runtime::config::CoreConfigBuilder::build_desktop` fills any bridge
//! the host did not supply with these.

mod filesystem;
mod http;
mod kv_store;
mod network;
mod power;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use kv_store::SqliteKeyValueStore;
pub use network::DesktopNetworkMonitor;
pub use power::DesktopPowerMonitor;
