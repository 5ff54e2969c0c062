use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_FORMAT: &str = "mp4";
pub const DEFAULT_QUALITY: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mp3,
    M4a,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            OutputFormat::Mp4 | OutputFormat::Webm | OutputFormat::Mkv => MediaKind::Video,
            OutputFormat::Mp3 | OutputFormat::M4a => MediaKind::Audio,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mkv => "video/x-matroska",
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::M4a => "audio/mp4",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported output format: {0}")]
pub struct UnsupportedFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            "mkv" => Ok(Self::Mkv),
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            other => Err(UnsupportedFormat(other.to_string())),
        }
    }
}

/// A single fetch as requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source_url: String,
    pub format: OutputFormat,
    pub quality: String,
}

impl FetchRequest {
    pub fn new(
        source_url: impl Into<String>,
        format: OutputFormat,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            format,
            quality: quality.into(),
        }
    }

    /// Quality label as used for matching and fingerprinting.
    pub fn normalized_quality(&self) -> String {
        let label = self.quality.trim().to_ascii_lowercase();
        if label.is_empty() {
            DEFAULT_QUALITY.to_string()
        } else {
            label
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Cache key derived from the identifying fields of a [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    const PREFIX: &'static str = "video:";

    pub fn of(request: &FetchRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.source_url.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.format.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.normalized_quality().as_bytes());
        Self(format!("{}{}", Self::PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
