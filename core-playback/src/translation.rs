//! # Lesson Translations
//!
//! Per-video, per-language description text. [`TranslationCache`] keeps a
//! text file per entry under the data directory with an LRU in front of it;
//! [`TranslationService`] decides between the network and the cache.

use crate::config::TranslationConfig;
use crate::error::TranslationError;
use crate::vault::sanitize_name;
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, TranslationError>;

/// Supported language codes and the `descriptionUrls` key for each.
pub const LANGUAGES: [(&str, &str); 5] = [
    ("en", "english"),
    ("hi", "hindi"),
    ("mr", "marathi"),
    ("te", "telugu"),
    ("ta", "tamil"),
];

/// `descriptionUrls` key for a language code.
pub fn language_key(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, key)| *key)
}

fn storage_error(e: impl std::fmt::Display) -> TranslationError {
    TranslationError::Storage(e.to_string())
}

// ============================================================================
// Cache
// ============================================================================

pub struct TranslationCache {
    fs: Arc<dyn FileSystemAccess>,
    directory: String,
    memory: Mutex<LruCache<(String, String), String>>,
}

impl TranslationCache {
    pub fn new(fs: Arc<dyn FileSystemAccess>, config: &TranslationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fs,
            directory: config.directory.clone(),
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn key(video_id: &str, lang: &str) -> (String, String) {
        (video_id.to_string(), lang.to_ascii_lowercase())
    }

    async fn dir(&self) -> Result<PathBuf> {
        let data = self.fs.data_directory().await.map_err(storage_error)?;
        Ok(data.join(&self.directory))
    }

    /// `<data>/<directory>/<video>_<lang>.txt`, both parts passed through
    /// [`sanitize_name`] so the file always lands inside the directory.
    pub async fn path_for(&self, video_id: &str, lang: &str) -> Result<PathBuf> {
        Ok(self.dir().await?.join(format!(
            "{}_{}.txt",
            sanitize_name(video_id),
            sanitize_name(&lang.to_ascii_lowercase())
        )))
    }

    pub async fn get(&self, video_id: &str, lang: &str) -> Result<Option<String>> {
        let key = Self::key(video_id, lang);
        if let Some(text) = self.memory.lock().get(&key) {
            return Ok(Some(text.clone()));
        }

        let path = self.path_for(video_id, lang).await?;
        let bytes = match self.fs.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(storage_error(e)),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.memory.lock().put(key, text.clone());
        Ok(Some(text))
    }

    /// Store or overwrite an entry.
    pub async fn put(&self, video_id: &str, lang: &str, text: &str) -> Result<()> {
        let dir = self.dir().await?;
        self.fs.create_dir_all(&dir).await.map_err(storage_error)?;
        let path = self.path_for(video_id, lang).await?;
        self.fs
            .write_file(&path, Bytes::copy_from_slice(text.as_bytes()))
            .await
            .map_err(storage_error)?;
        self.memory
            .lock()
            .put(Self::key(video_id, lang), text.to_string());
        debug!(video_id, lang, bytes = text.len(), "Cached translation");
        Ok(())
    }

    pub async fn has(&self, video_id: &str, lang: &str) -> Result<bool> {
        if self.memory.lock().contains(&Self::key(video_id, lang)) {
            return Ok(true);
        }
        let path = self.path_for(video_id, lang).await?;
        self.fs.exists(&path).await.map_err(storage_error)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Text returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub language: String,
    pub text: String,
    pub from_cache: bool,
}

pub struct TranslationService {
    http: Arc<dyn HttpClient>,
    cache: TranslationCache,
    retry_policy: RetryPolicy,
}

impl TranslationService {
    pub fn new(http: Arc<dyn HttpClient>, cache: TranslationCache) -> Self {
        Self {
            http,
            cache,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Description text of `video_id` in `lang`.
    ///
    /// Offline only the cache is consulted. Online the remote file is
    /// fetched and cached; the cache is never used as a silent fallback for
    /// a failed fetch.
    #[instrument(skip(self, description_urls))]
    pub async fn describe(
        &self,
        video_id: &str,
        lang: &str,
        description_urls: &BTreeMap<String, String>,
        offline: bool,
    ) -> Result<Translation> {
        let key = language_key(lang)
            .ok_or_else(|| TranslationError::LanguageUnavailable(lang.to_string()))?;

        if offline {
            return match self.cache.get(video_id, lang).await? {
                Some(text) => Ok(Translation {
                    language: lang.to_string(),
                    text,
                    from_cache: true,
                }),
                None => {
                    info!(video_id, lang, "Translation not cached for offline use");
                    Err(TranslationError::NotCachedOffline {
                        video_id: video_id.to_string(),
                        language: lang.to_string(),
                    })
                }
            };
        }

        let url = description_urls
            .get(key)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| TranslationError::LanguageUnavailable(lang.to_string()))?;

        let response = self
            .http
            .execute_with_retry(HttpRequest::get(url.as_str()), self.retry_policy.clone())
            .await
            .map_err(|e| TranslationError::FetchFailed(e.to_string()))?;

        if !response.is_success() {
            warn!(video_id, lang, status = response.status, "Translation fetch rejected");
            return Err(TranslationError::FetchFailed(format!(
                "HTTP {}",
                response.status
            )));
        }

        let text = response
            .text()
            .map_err(|e| TranslationError::FetchFailed(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(TranslationError::EmptyText);
        }

        self.cache.put(video_id, lang, &text).await?;

        Ok(Translation {
            language: lang.to_string(),
            text,
            from_cache: false,
        })
    }

    /// Whether `lang` can be shown with the given connectivity.
    pub async fn is_available(
        &self,
        video_id: &str,
        lang: &str,
        description_urls: &BTreeMap<String, String>,
        offline: bool,
    ) -> Result<bool> {
        if language_key(lang).is_none() {
            Ok(false)
        } else if offline {
            self.cache.has(video_id, lang).await
        } else {
            Ok(language_key(lang)
                .and_then(|key| description_urls.get(key))
                .is_some_and(|url| !url.is_empty()))
        }
    }
}
