//! Canonical (provider-agnostic) generation configuration.
//!
//! A [`CanonicalConfig`] is what the caller hands to the orchestrator. Each
//! provider adapter converts it into its own wire shape; the canonical form
//! is snapshotted onto the job at submission and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Duration used when the caller does not specify one.
pub const DEFAULT_DURATION_SECS: u32 = 10;

/// Shortest clip any provider accepts.
pub const MIN_DURATION_SECS: u32 = 1;

/// Longest clip any provider accepts.
pub const MAX_DURATION_SECS: u32 = 60;

/// Upper bound on prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 8_000;

// ---------------------------------------------------------------------------
// AspectRatio
// ---------------------------------------------------------------------------

/// Frame shape of the requested output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
        }
    }

    /// Parse from the `w:h` notation, rejecting unknown ratios.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(CoreError::Validation(format!(
                "Unknown aspect ratio '{other}'. Must be one of: 16:9, 9:16, 1:1"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CanonicalConfig
// ---------------------------------------------------------------------------

/// Provider-agnostic generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalConfig {
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_duration")]
    pub duration_secs: u32,
    /// Request the provider's higher quality tier.
    #[serde(default)]
    pub hd: bool,
    /// Optional URL of a reference image the output should follow.
    #[serde(default)]
    pub reference_asset: Option<String>,
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SECS
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            duration_secs: DEFAULT_DURATION_SECS,
            hd: false,
            reference_asset: None,
        }
    }
}

impl CanonicalConfig {
    /// Reject configurations no provider could accept.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(CoreError::Validation(format!(
                "duration_secs must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS}, got {}",
                self.duration_secs
            )));
        }
        if let Some(asset) = &self.reference_asset {
            validate_asset_reference(asset)?;
        }
        Ok(())
    }

    /// Builder-style override of the reference asset.
    pub fn with_reference(mut self, asset: impl Into<String>) -> Self {
        self.reference_asset = Some(asset.into());
        self
    }
}

/// A reference asset must be a fetchable URL or an inline data URI.
pub fn validate_asset_reference(asset: &str) -> Result<(), CoreError> {
    let asset = asset.trim();
    if asset.is_empty() {
        return Err(CoreError::Validation(
            "reference_asset must not be empty".to_string(),
        ));
    }
    if !(asset.starts_with("http://")
        || asset.starts_with("https://")
        || asset.starts_with("data:"))
    {
        return Err(CoreError::Validation(format!(
            "reference_asset must be an http(s) URL or data URI, got '{asset}'"
        )));
    }
    Ok(())
}

/// Prompts must be non-blank and bounded.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_CHARS} characters, got {chars}"
        )));
    }
    Ok(())
}
