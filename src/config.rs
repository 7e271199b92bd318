//! Centralized application configuration.
//! Combines environment variables and CLI arguments, plus the bucket
//! naming scheme derived from the configured prefix.

use anyhow::{Context, Result};
use clap::Parser;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Scratch space for frame extraction.
    pub scratch_dir: String,
    pub bucket_prefix: String,
    pub recognizer_url: String,
    pub recognizer_api_key: String,
    /// Minimum box probability for a detection to count as a face.
    pub detection_threshold: f32,
    /// Minimum subject similarity for a match to count as recognized.
    pub confidence_threshold: f32,
    /// Sources below this size skip compression.
    pub compress_min_bytes: i64,
    /// Thumbnail bounding box, pixels.
    pub thumb_bound: u32,
    /// Evenly spaced frames sampled per video.
    pub video_frames: usize,
    pub workers: usize,
    pub poll_interval_ms: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Face-classified photo/video album service")]
pub struct Args {
    /// Host to bind to (overrides FACESORT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FACESORT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides FACESORT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FACESORT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Recognition service base URL (overrides FACESORT_RECOGNIZER_URL)
    #[arg(long)]
    pub recognizer_url: Option<String>,

    /// Recognition service API key (overrides FACESORT_RECOGNIZER_API_KEY)
    #[arg(long)]
    pub recognizer_api_key: Option<String>,

    /// Number of pipeline workers (overrides FACESORT_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("FACESORT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = env_or("FACESORT_PORT", 3000)?;
        let env_storage =
            env::var("FACESORT_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FACESORT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/facesort.db".into());
        let scratch_dir =
            env::var("FACESORT_SCRATCH_DIR").unwrap_or_else(|_| "./data/scratch".into());
        let bucket_prefix = env::var("FACESORT_BUCKET_PREFIX").unwrap_or_else(|_| "ms".into());
        let env_recognizer =
            env::var("FACESORT_RECOGNIZER_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".into());
        let env_api_key = env::var("FACESORT_RECOGNIZER_API_KEY").unwrap_or_default();

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            scratch_dir,
            bucket_prefix,
            recognizer_url: args.recognizer_url.unwrap_or(env_recognizer),
            recognizer_api_key: args.recognizer_api_key.unwrap_or(env_api_key),
            detection_threshold: env_or("FACESORT_DETECTION_THRESHOLD", 0.9)?,
            confidence_threshold: env_or("FACESORT_CONFIDENCE_THRESHOLD", 0.95)?,
            compress_min_bytes: env_or("FACESORT_COMPRESS_MIN_BYTES", 1_000_000)?,
            thumb_bound: env_or("FACESORT_THUMB_BOUND", 320)?,
            video_frames: env_or("FACESORT_VIDEO_FRAMES", 5)?,
            workers: args.workers.map(Ok).unwrap_or(env_or("FACESORT_WORKERS", 4))?,
            poll_interval_ms: env_or("FACESORT_POLL_INTERVAL_MS", 500)?,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn buckets(&self) -> BucketNames {
        BucketNames::new(&self.bucket_prefix)
    }
}

/// The bucket naming scheme. Group buckets share a prefix so they can be
/// told apart from system buckets; non-media files land in an unprefixed
/// `others`.
#[derive(Debug, Clone)]
pub struct BucketNames {
    prefix: String,
}

impl BucketNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Intake bucket for freshly uploaded images.
    pub fn no_group(&self) -> String {
        format!("{}-nogroup", self.prefix)
    }

    /// Intake bucket for videos.
    pub fn video(&self) -> String {
        format!("{}-video", self.prefix)
    }

    /// Non-media files, stored verbatim.
    pub fn others(&self) -> String {
        "others".to_string()
    }

    /// Items with at least one face the service could not confidently match.
    pub fn need_recognition(&self) -> String {
        format!("{}-needrecognition", self.prefix)
    }

    /// Items with no detected face at all.
    pub fn other(&self) -> String {
        format!("{}-other", self.prefix)
    }

    /// Group bucket for one recognized subject.
    pub fn subject(&self, subject: &str) -> String {
        format!("{}-{}", self.prefix, sanitize_subject(subject))
    }
}

/// Map a subject name onto the bucket-name alphabet: lowercase alphanumeric
/// runs joined by single hyphens.
fn sanitize_subject(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    let mut last_dash = true;
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_follow_prefix() {
        let buckets = BucketNames::new("ms");
        assert_eq!(buckets.no_group(), "ms-nogroup");
        assert_eq!(buckets.video(), "ms-video");
        assert_eq!(buckets.others(), "others");
        assert_eq!(buckets.need_recognition(), "ms-needrecognition");
        assert_eq!(buckets.other(), "ms-other");
        assert_eq!(buckets.subject("Alice"), "ms-alice");
    }

    #[test]
    fn subjects_are_sanitized_for_bucket_names() {
        let buckets = BucketNames::new("ms");
        assert_eq!(buckets.subject("Mary Jane"), "ms-mary-jane");
        assert_eq!(buckets.subject("a__b!!"), "ms-a-b");
    }
}
