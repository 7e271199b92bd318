//! Media kinds, storage variants, and canonical naming.
//!
//! Incoming files are classified by extension, renamed into a canonical
//! basename, and stamped with an origin timestamp. The timestamp grammar is
//! deliberately strict: a stem either matches it exactly or contributes no
//! timestamp at all.

use serde::{Deserialize, Serialize};

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "svg", "bmp", "webp"];
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// Broad classification of an uploaded file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify a filename by its extension (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        let Some(ext) = extension(name) else {
            return MediaKind::Other;
        };
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }

    /// Type tag prepended to non-camera basenames (`IMG__`, `VIDEO__`).
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some("IMG"),
            MediaKind::Video => Some("VIDEO"),
            MediaKind::Other => None,
        }
    }
}

/// Storage variant of a media object, mapped onto a key prefix inside its
/// bucket: `source/`, `min/`, `thumb/`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Source,
    Compressed,
    Thumbnail,
}

impl Variant {
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Variant::Source => "source",
            Variant::Compressed => "min",
            Variant::Thumbnail => "thumb",
        }
    }

    /// Build the object key for this variant of `basename`.
    pub fn key_for(&self, basename: &str) -> String {
        format!("{}/{}", self.key_prefix(), basename)
    }
}

/// A physical media artifact stored at `(bucket, key)`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MediaObject {
    pub bucket: String,
    pub key: String,
    pub kind: MediaKind,
    pub basename: String,
    /// Epoch milliseconds derived from the filename, or the upload time.
    pub origin_ms: i64,
    pub variant: Variant,
}

/// Canonical basename plus the origin timestamp derived while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub basename: String,
    pub origin_ms: i64,
}

/// Compute the canonical basename for an upload.
///
/// A name matching the camera pattern `<epoch-seconds>_<yyyymmdd>_...` is
/// collapsed to `<TAG>__<epoch-ms>.<ext>`. A name already carrying a type
/// tag is kept as-is. Anything else is prefixed with the type tag and kept.
/// `now_ms` is the fallback origin timestamp for names the grammar rejects.
pub fn canonical_name(name: &str, kind: MediaKind, now_ms: i64) -> CanonicalName {
    let tag = kind.type_tag().unwrap_or("IMG");

    if let Some(ms) = camera_pattern_ms(name) {
        let ext = extension(name).unwrap_or("bin");
        return CanonicalName {
            basename: format!("{tag}__{ms}.{ext}"),
            origin_ms: ms,
        };
    }

    let basename = if stem(name)
        .split_once("__")
        .is_some_and(|(t, _)| !t.is_empty() && t.chars().all(|c| c.is_ascii_uppercase()))
    {
        name.to_string()
    } else {
        format!("{tag}__{name}")
    };

    let origin_ms = origin_timestamp(&basename).unwrap_or(now_ms);
    CanonicalName { basename, origin_ms }
}

/// Extract an origin timestamp (epoch ms) from a canonical basename.
///
/// Grammar: the stem must be `<digits>` or `<TAG>__<digits>`, where
/// `<digits>` is 13 digits (epoch milliseconds) or 10 digits (epoch
/// seconds). Anything else yields `None`.
pub fn origin_timestamp(basename: &str) -> Option<i64> {
    let stem = stem(basename);
    let digits = match stem.split_once("__") {
        Some((_, rest)) => rest,
        None => stem,
    };
    parse_epoch_digits(digits)
}

fn parse_epoch_digits(digits: &str) -> Option<i64> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match digits.len() {
        13 => digits.parse::<i64>().ok(),
        10 => digits.parse::<i64>().ok().map(|s| s * 1000),
        _ => None,
    }
}

/// Match the camera naming pattern `<epoch-seconds>_<yyyymmdd>_...` and
/// return the normalized millisecond timestamp.
fn camera_pattern_ms(name: &str) -> Option<i64> {
    let stem = stem(name);
    let mut parts = stem.splitn(3, '_');
    let secs = parts.next()?;
    let date = parts.next()?;
    parts.next()?;
    if secs.len() != 10 || !secs.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if date.len() != 8 || !date.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    secs.parse::<i64>().ok().map(|s| s * 1000)
}

fn extension(name: &str) -> Option<&str> {
    match name.rsplit_once('.') {
        Some((before, ext)) if !before.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((before, _)) if !before.is_empty() => before,
        _ => name,
    }
}
