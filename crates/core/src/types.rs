//! Shared identifiers and enums used across every genflow crate.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a selectable model, e.g. `"sora-2@sutu"`.
pub type ModelId = String;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Kind of media a generation request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Image,
    Text,
    Audio,
    Video,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 4] = [
        Category::Image,
        Category::Text,
        Category::Audio,
        Category::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Text => "text",
            Category::Audio => "audio",
            Category::Video => "video",
        }
    }

    /// Parse from a string, rejecting unknown values.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Category::Image),
            "text" => Ok(Category::Text),
            "audio" => Ok(Category::Audio),
            "video" => Ok(Category::Video),
            other => Err(CoreError::Validation(format!(
                "Unknown category '{other}'. Must be one of: image, text, audio, video"
            ))),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Identifies which provider adapter owns a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Sutu,
    Yunwu,
    Dayu,
    Kie,
    Yijia,
}

impl ProviderKind {
    /// Every built-in provider.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Sutu,
        ProviderKind::Yunwu,
        ProviderKind::Dayu,
        ProviderKind::Kie,
        ProviderKind::Yijia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sutu => "sutu",
            ProviderKind::Yunwu => "yunwu",
            ProviderKind::Dayu => "dayu",
            ProviderKind::Kie => "kie",
            ProviderKind::Yijia => "yijia",
        }
    }

    /// Parse from a string, rejecting unknown values.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Validation(format!("Unknown provider '{s}'")))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobRef
// ---------------------------------------------------------------------------

/// Globally unique handle for a job: provider ids are only unique per
/// provider, so the pair is the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub provider: ProviderKind,
    pub id: String,
}

impl JobRef {
    pub fn new(provider: ProviderKind, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}
