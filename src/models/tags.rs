//! The wire-level tag contract attached to stored objects.
//!
//! Other tools read these keys directly off the store, so the exact
//! spellings (including `orginTime`) are load-bearing:
//!
//! - `source`   — `bucket/key` path back to the canonical object
//! - `refs`     — comma-separated, duplicate-free list of classified copies
//! - `mini`     — path to the compressed variant substituted for the source
//! - `orginTime` — origin timestamp, epoch milliseconds as a string
//! - `width` / `height` — source pixel dimensions

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const TAG_SOURCE: &str = "source";
pub const TAG_REFS: &str = "refs";
pub const TAG_MINI: &str = "mini";
pub const TAG_ORIGIN_TIME: &str = "orginTime";
pub const TAG_WIDTH: &str = "width";
pub const TAG_HEIGHT: &str = "height";

/// A `bucket/key` pair, the textual form used inside `source` and `refs`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
}

impl ObjectPath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ObjectPath {
    type Err = MalformedPath;

    /// Parse `bucket/key`. The key may itself contain slashes
    /// (`ms-nogroup/thumb/IMG__1.jpg`), so only the first one splits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(MalformedPath(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPath(pub String);

impl fmt::Display for MalformedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed object path `{}`", self.0)
    }
}

impl std::error::Error for MalformedPath {}

/// String key-value tags attached to one object, with typed accessors for
/// the recognized keys.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet(pub BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// The canonical-object back-reference, if present and well-formed.
    pub fn source(&self) -> Option<ObjectPath> {
        self.get(TAG_SOURCE).and_then(|s| s.parse().ok())
    }

    pub fn set_source(&mut self, path: &ObjectPath) {
        self.set(TAG_SOURCE, path.to_string());
    }

    pub fn mini(&self) -> Option<ObjectPath> {
        self.get(TAG_MINI).and_then(|s| s.parse().ok())
    }

    pub fn set_mini(&mut self, path: &ObjectPath) {
        self.set(TAG_MINI, path.to_string());
    }

    pub fn origin_time(&self) -> Option<i64> {
        self.get(TAG_ORIGIN_TIME).and_then(|s| s.parse().ok())
    }

    pub fn set_origin_time(&mut self, epoch_ms: i64) {
        self.set(TAG_ORIGIN_TIME, epoch_ms.to_string());
    }

    /// Decode the `refs` set. Duplicates and malformed entries in the raw
    /// value collapse away; the set form is what copy/remove reason about.
    pub fn refs(&self) -> BTreeSet<ObjectPath> {
        self.get(TAG_REFS)
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Encode and store a `refs` set. An empty set clears the tag.
    pub fn set_refs(&mut self, refs: &BTreeSet<ObjectPath>) {
        if refs.is_empty() {
            self.remove(TAG_REFS);
        } else {
            let joined = refs
                .iter()
                .map(ObjectPath::to_string)
                .collect::<Vec<_>>()
                .join(",");
            self.set(TAG_REFS, joined);
        }
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trips_with_nested_keys() {
        let p: ObjectPath = "ms-nogroup/thumb/IMG__1.jpg".parse().unwrap();
        assert_eq!(p.bucket, "ms-nogroup");
        assert_eq!(p.key, "thumb/IMG__1.jpg");
        assert_eq!(p.to_string(), "ms-nogroup/thumb/IMG__1.jpg");

        assert!("no-slash".parse::<ObjectPath>().is_err());
        assert!("/leading".parse::<ObjectPath>().is_err());
        assert!("trailing/".parse::<ObjectPath>().is_err());
    }

    #[test]
    fn refs_codec_deduplicates() {
        let mut tags = TagSet::new();
        tags.set(TAG_REFS, "a/x,b/y,a/x,,bogus");
        let refs = tags.refs();
        assert_eq!(refs.len(), 2);

        let mut tags = TagSet::new();
        tags.set_refs(&refs);
        assert_eq!(tags.get(TAG_REFS), Some("a/x,b/y"));
    }

    #[test]
    fn empty_refs_clears_the_tag() {
        let mut tags = TagSet::new();
        tags.set(TAG_REFS, "a/x");
        tags.set_refs(&BTreeSet::new());
        assert_eq!(tags.get(TAG_REFS), None);
        assert!(tags.refs().is_empty());
    }

    #[test]
    fn origin_time_round_trip() {
        let mut tags = TagSet::new();
        tags.set_origin_time(1_700_000_000_000);
        assert_eq!(tags.get(TAG_ORIGIN_TIME), Some("1700000000000"));
        assert_eq!(tags.origin_time(), Some(1_700_000_000_000));
    }
}
