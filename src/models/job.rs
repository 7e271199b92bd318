//! Pipeline job stages and payloads.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One unit of pipeline work. Stage names are the queue's routing keys.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compress,
    Thumbnail,
    Recognize,
    Video,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Compress => "compress",
            Stage::Thumbnail => "thumbnail",
            Stage::Recognize => "recognize",
            Stage::Video => "video",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compress" => Ok(Stage::Compress),
            "thumbnail" => Ok(Stage::Thumbnail),
            "recognize" => Ok(Stage::Recognize),
            "video" => Ok(Stage::Video),
            "cleanup" => Ok(Stage::Cleanup),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage `{}`", self.0)
    }
}

impl std::error::Error for UnknownStage {}

/// Payload carried by every pipeline job.
///
/// `bucket`/`object` locate the canonical source object; the variant keys
/// are filled in by the router so later stages never re-derive them.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct JobPayload {
    pub bucket: String,
    pub object: String,
    pub basename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mini_object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_object: Option<String>,
    /// Local file the object was synced from; deleted after a successful
    /// run when `remove_source` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    pub remove_source: bool,
    #[serde(default)]
    pub re_recognition: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in [
            Stage::Compress,
            Stage::Thumbnail,
            Stage::Recognize,
            Stage::Video,
            Stage::Cleanup,
        ] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("resize".parse::<Stage>().is_err());
    }

    #[test]
    fn payload_defaults_omitted_fields() {
        let payload: JobPayload = serde_json::from_str(
            r#"{"bucket":"ms-nogroup","object":"source/IMG__1.jpg","basename":"IMG__1.jpg"}"#,
        )
        .unwrap();
        assert!(!payload.remove_source);
        assert!(!payload.re_recognition);
        assert!(payload.mini_object.is_none());
    }
}
