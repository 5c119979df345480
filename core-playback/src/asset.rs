//! # Media Assets
//!
//! Lesson metadata as delivered by the asset API, plus [`AssetClient`] for
//! fetching it.

use crate::error::{PlaybackError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use core_runtime::logging::redact_url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

// ============================================================================
// Renditions
// ============================================================================

/// An encoded quality variant of a video.
///
/// Ordered from lowest to highest bandwidth; `AutoSource` is the asset's
/// canonical stream and sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rendition {
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "auto-source")]
    AutoSource,
}

impl Rendition {
    /// Fixed tiers, lowest first.
    pub const TIERS: [Rendition; 3] = [Rendition::P240, Rendition::P360, Rendition::P720];

    pub fn tag(&self) -> &'static str {
        match self {
            Rendition::P240 => "240p",
            Rendition::P360 => "360p",
            Rendition::P720 => "720p",
            Rendition::AutoSource => "auto-source",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "240p" => Some(Rendition::P240),
            "360p" => Some(Rendition::P360),
            "720p" => Some(Rendition::P720),
            "auto-source" => Some(Rendition::AutoSource),
            _ => None,
        }
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// User quality choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QualityMode {
    /// Follow the bandwidth estimate.
    #[default]
    Auto,
    /// A pinned rendition.
    Fixed(Rendition),
}

impl QualityMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, QualityMode::Auto)
    }
}

// ============================================================================
// Asset Model
// ============================================================================

/// Downloadable file attached to a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: Option<String>,
    /// Size in megabytes as reported by the API.
    #[serde(rename = "size", default)]
    pub size_mb: Option<f64>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A lesson video and everything needed to play it.
///
/// Immutable once fetched; refetched when the video id changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub course_id: String,
    pub video_id: String,
    pub title: String,
    /// Canonical stream URL.
    pub url: Option<String>,
    pub renditions: BTreeMap<Rendition, String>,
    pub attachments: Vec<Attachment>,
    pub quiz: Vec<serde_json::Value>,
    /// Translation text URLs keyed by language name (`english`, `hindi`, ...).
    pub description_urls: BTreeMap<String, String>,
    pub thumbnail: Option<String>,
}

impl MediaAsset {
    /// Minimal asset for offline playback of a downloaded lesson.
    pub fn offline(
        course_id: impl Into<String>,
        video_id: impl Into<String>,
        title: impl Into<String>,
        thumbnail: Option<String>,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            video_id: video_id.into(),
            title: title.into(),
            url: None,
            renditions: BTreeMap::new(),
            attachments: Vec::new(),
            quiz: Vec::new(),
            description_urls: BTreeMap::new(),
            thumbnail,
        }
    }

    pub fn rendition_url(&self, rendition: Rendition) -> Option<&str> {
        self.renditions.get(&rendition).map(String::as_str)
    }

    /// Lowest fixed tier the asset carries.
    pub fn lowest_tier(&self) -> Option<Rendition> {
        Rendition::TIERS
            .into_iter()
            .find(|tier| self.renditions.contains_key(tier))
    }

    pub fn has_quiz(&self) -> bool {
        !self.quiz.is_empty()
    }
}

/// Course header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// One entry of a course's ordered lesson list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonSummary {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetWire {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    resolutions: Option<ResolutionsWire>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    quiz: Vec<serde_json::Value>,
    #[serde(default)]
    description_urls: BTreeMap<String, String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolutionsWire {
    p240: Option<String>,
    p360: Option<String>,
    p720: Option<String>,
}

/// The lesson list endpoint answers with either a bare array or `{ "videos": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LessonListWire {
    List(Vec<LessonSummary>),
    Wrapped {
        #[serde(default)]
        videos: Vec<LessonSummary>,
    },
}

// ============================================================================
// Asset Client
// ============================================================================

/// Client for the course and lesson API.
pub struct AssetClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    origin: String,
    retry: RetryPolicy,
}

impl AssetClient {
    /// `base_url` is the API root, e.g. `https://lessons.example.com/api`.
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let origin = origin_of(&base_url);
        Self {
            http,
            base_url,
            origin,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Fetch one lesson's metadata.
    #[instrument(skip(self))]
    pub async fn fetch_asset(&self, course_id: &str, video_id: &str) -> Result<MediaAsset> {
        let url = format!("{}/videos/course/{}/{}", self.base_url, course_id, video_id);
        let wire: AssetWire = self.get_json(&url).await?;

        let resolutions = wire.resolutions.unwrap_or_default();
        let mut renditions = BTreeMap::new();
        for (rendition, value) in [
            (Rendition::P240, resolutions.p240),
            (Rendition::P360, resolutions.p360),
            (Rendition::P720, resolutions.p720),
            (Rendition::AutoSource, wire.url.clone()),
        ] {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                renditions.insert(rendition, self.resolve_url(&value));
            }
        }

        let attachments = wire
            .attachments
            .into_iter()
            .map(|mut attachment| {
                attachment.download_url = attachment.download_url.map(|u| self.resolve_url(&u));
                attachment
            })
            .collect();

        let description_urls = wire
            .description_urls
            .into_iter()
            .map(|(language, url)| (language, self.resolve_url(&url)))
            .collect();

        let asset = MediaAsset {
            course_id: course_id.to_string(),
            video_id: video_id.to_string(),
            title: wire.title,
            url: wire.url.map(|u| self.resolve_url(&u)),
            renditions,
            attachments,
            quiz: wire.quiz,
            description_urls,
            thumbnail: wire.thumbnail.map(|u| self.resolve_url(&u)),
        };

        debug!(
            video_id,
            renditions = asset.renditions.len(),
            attachments = asset.attachments.len(),
            "Fetched asset"
        );
        Ok(asset)
    }

    /// Fetch the ordered lesson list of a course.
    #[instrument(skip(self))]
    pub async fn fetch_lessons(&self, course_id: &str) -> Result<Vec<LessonSummary>> {
        let url = format!("{}/videos/course/{}", self.base_url, course_id);
        let lessons = match self.get_json::<LessonListWire>(&url).await? {
            LessonListWire::List(list) => list,
            LessonListWire::Wrapped { videos } => videos,
        };
        Ok(lessons)
    }

    #[instrument(skip(self))]
    pub async fn fetch_course(&self, course_id: &str) -> Result<Course> {
        let url = format!("{}/courses/{}", self.base_url, course_id);
        let mut course: Course = self.get_json(&url).await?;
        if course.id.is_empty() {
            course.id = course_id.to_string();
        }
        Ok(course)
    }

    /// Resolve server-relative URLs (`/uploads/x.mp4`) against the API origin.
    pub fn resolve_url(&self, url: &str) -> String {
        let url = url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.origin, url)
        } else {
            format!("{}/{}", self.origin, url)
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .execute_with_retry(HttpRequest::get(url), self.retry.clone())
            .await
            .map_err(|e| PlaybackError::AssetUnavailable(e.to_string()))?;

        if !response.is_success() {
            warn!(url = %redact_url(url), status = response.status, "Asset API rejected request");
            return Err(PlaybackError::AssetUnavailable(format!(
                "HTTP {} from {}",
                response.status, url
            )));
        }

        response
            .json()
            .map_err(|e| PlaybackError::AssetUnavailable(e.to_string()))
    }
}

/// `scheme://host[:port]` of an absolute URL.
fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            let host_end = rest.find('/').map(|i| scheme_end + 3 + i).unwrap_or(url.len());
            url[..host_end].to_string()
        }
        None => url.to_string(),
    }
}
