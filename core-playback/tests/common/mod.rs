//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpDownload, HttpRequest, HttpResponse};
use bridge_traits::storage::KeyValueStore;
use bytes::Bytes;
use core_playback::asset::AssetClient;
use core_playback::config::PlayerConfig;
use core_playback::download::DownloadManager;
use core_playback::estimator::NetworkQualityEstimator;
use core_playback::library::DownloadLibrary;
use core_playback::orchestrator::{PlaybackContext, PlayerCommand, PlayerCommands};
use core_playback::progress::ProgressStore;
use core_playback::signals::SignalHub;
use core_playback::translation::{TranslationCache, TranslationService};
use core_playback::vault::ContentVault;
use core_runtime::config::FeatureFlags;
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const API: &str = "https://lessons.test/api";
pub const VIDEO_BYTES: &[u8] = b"0123456789 lesson video bytes";

/// Key-value store over a map.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::StorageError("disk full".into()));
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

/// HTTP server answering from a URL table. Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    pub requests: Mutex<Vec<String>>,
    pub offline: AtomicBool,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.routes
            .lock()
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn requested(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }

    fn lookup(&self, request: &HttpRequest) -> Result<(u16, Bytes)> {
        self.requests.lock().push(request.url.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("network unreachable".into()));
        }
        Ok(self
            .routes
            .lock()
            .get(&request.url)
            .cloned()
            .unwrap_or((404, Bytes::new())))
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (status, body) = self.lookup(&request)?;
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }

    async fn open_download(&self, request: HttpRequest) -> Result<HttpDownload> {
        let (status, body) = self.lookup(&request)?;
        let offset = request
            .headers
            .get("Range")
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

        let full_len = body.len();
        let mut headers = HashMap::new();
        let (status, body) = match offset {
            Some(offset) if status == 200 && offset >= full_len => (416, Bytes::new()),
            Some(offset) if status == 200 => {
                headers.insert(
                    "Content-Range".to_string(),
                    format!("bytes {}-{}/{}", offset, full_len - 1, full_len),
                );
                (206, body.slice(offset..))
            }
            _ => (status, body),
        };
        Ok(HttpDownload {
            status,
            headers,
            content_length: Some(body.len() as u64),
            body: Box::new(std::io::Cursor::new(body)),
        })
    }
}

pub fn temp_fs() -> (Arc<TokioFileSystem>, PathBuf) {
    let root = std::env::temp_dir().join(format!("lesson-player-{}", uuid::Uuid::new_v4()));
    let fs = TokioFileSystem::with_directories(root.join("cache"), root.join("data"));
    (Arc::new(fs), root)
}

pub fn test_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.probe.url = format!("{}/probe", API);
    config.download.retry_base_delay = Duration::from_millis(1);
    config
}

/// Asset JSON for `video123` with all three tiers and two translations.
pub fn asset_json() -> String {
    serde_json::json!({
        "title": "Fractions",
        "url": "/uploads/video123.mp4",
        "resolutions": {
            "p240": "/uploads/video123_240.mp4",
            "p360": "/uploads/video123_360.mp4",
            "p720": "/uploads/video123_720.mp4"
        },
        "descriptionUrls": {
            "english": "/uploads/video123_en.txt",
            "hindi": "/uploads/video123_hi.txt"
        },
        "thumbnail": "/uploads/video123.jpg"
    })
    .to_string()
}

pub struct Harness {
    pub ctx: PlaybackContext,
    pub http: Arc<ScriptedHttp>,
    pub kv: Arc<MemoryStore>,
    pub root: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let http = ScriptedHttp::new();
        http.route(&format!("{}/videos/course/c1/video123", API), 200, asset_json());
        http.route("https://lessons.test/uploads/video123.mp4", 200, VIDEO_BYTES);
        http.route("https://lessons.test/uploads/video123_en.txt", 200, "Hello learners");
        http.route("https://lessons.test/uploads/video123_hi.txt", 200, "Namaste");

        let (fs, root) = temp_fs();
        let kv = Arc::new(MemoryStore::default());
        let events = EventBus::default();
        let config = Arc::new(config);

        let ctx = PlaybackContext {
            features: FeatureFlags::default(),
            events: events.clone(),
            signals: SignalHub::detached(events.clone()),
            estimator: Arc::new(NetworkQualityEstimator::new(
                http.clone(),
                config.probe.clone(),
                events.clone(),
            )),
            downloads: Arc::new(DownloadManager::new(
                http.clone(),
                fs.clone(),
                config.download.clone(),
            )),
            vault: Arc::new(ContentVault::new(fs.clone(), config.vault.clone())),
            library: Arc::new(DownloadLibrary::new(kv.clone())),
            progress: Arc::new(ProgressStore::new(kv.clone())),
            translations: Arc::new(TranslationService::new(
                http.clone(),
                TranslationCache::new(fs, &config.translation),
            )),
            assets: Some(Arc::new(AssetClient::new(http.clone(), API))),
            config,
        };

        Self { ctx, http, kv, root }
    }
}

/// Next command, failing the test after a second.
pub async fn next_command(commands: &mut PlayerCommands) -> PlayerCommand {
    tokio::time::timeout(Duration::from_secs(1), commands.recv())
        .await
        .expect("player command")
        .expect("command channel open")
}
