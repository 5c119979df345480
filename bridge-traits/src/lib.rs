//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host platform must implement for the
//! lesson player core.
//!
//! ## Overview
//!
//! This crate defines the contract between the core library and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that is provided differently per platform (desktop,
//! iOS, Android).
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations, ranged downloads, retry
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Scratch area, durable data area, file moves
//!
//! ### Persistence
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable `read(key)`/`write(key, value)` store
//!
//! ### Platform Signals
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and metered network detection
//! - [`PowerMonitor`](power::PowerMonitor) - Battery level and OS low-power mode
//!
//! ### Logging
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Platform
//! implementations should convert platform-specific failures into it and keep
//! the message actionable (include the path or URL involved).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod logging;
pub mod network;
pub mod power;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpDownload, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use power::{PowerChangeStream, PowerInfo, PowerMonitor};
pub use storage::{FileMetadata, FileSystemAccess, KeyValueStore};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
