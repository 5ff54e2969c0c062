use std::path::{Path, PathBuf};

use crate::config::DownloaderSection;
use crate::media::{FetchRequest, OutputFormat};

/// Bitrate passed to `--audio-quality` when the label is not recognised.
pub const BEST_AUDIO_QUALITY: &str = "0";
/// Video stream selector used when the label is not recognised.
pub const BEST_VIDEO_SELECTOR: &str = "bestvideo";

/// A fully resolved invocation of the external downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

impl CommandSpec {
    /// Printable form, for logs.
    pub fn display(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

/// Map an audio bitrate label (`"320k"`, `"128K"`, ...) to the value given to
/// `--audio-quality`.
pub fn audio_bitrate(label: &str) -> &'static str {
    match label.trim().to_ascii_lowercase().as_str() {
        "320k" => "320K",
        "256k" => "256K",
        "192k" => "192K",
        "128k" => "128K",
        "96k" => "96K",
        "64k" => "64K",
        _ => BEST_AUDIO_QUALITY,
    }
}

fn max_height(label: &str) -> Option<u32> {
    match label.trim().to_ascii_lowercase().as_str() {
        "144p" => Some(144),
        "240p" => Some(240),
        "360p" => Some(360),
        "480p" => Some(480),
        "720p" => Some(720),
        "1080p" => Some(1080),
        "1440p" => Some(1440),
        "2160p" | "4k" => Some(2160),
        _ => None,
    }
}

/// Map a resolution label to a video stream selector for `format`.
pub fn video_selector(label: &str, format: OutputFormat) -> String {
    let Some(height) = max_height(label) else {
        return BEST_VIDEO_SELECTOR.to_string();
    };
    match format {
        OutputFormat::Mp4 | OutputFormat::Webm => {
            format!("bestvideo[height<={height}][ext={}]", format.extension())
        }
        _ => format!("bestvideo[height<={height}]"),
    }
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: PathBuf,
    ffmpeg_location: PathBuf,
    extractor_args: Vec<String>,
    extra_args: Vec<String>,
    cookies: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new(binary: impl Into<PathBuf>, ffmpeg_location: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg_location: ffmpeg_location.into(),
            extractor_args: Vec::new(),
            extra_args: Vec::new(),
            cookies: None,
        }
    }

    pub fn from_config(config: &DownloaderSection) -> Self {
        Self::new(&config.binary, &config.ffmpeg_location)
            .with_extractor_args(config.extractor_args.clone())
            .with_extra_args(config.extra_args.clone())
    }

    pub fn with_extractor_args(mut self, args: Vec<String>) -> Self {
        self.extractor_args = args;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Cookie jar handed to the extractor, but only while the file exists.
    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn build(&self, request: &FetchRequest, output_path: &Path) -> CommandSpec {
        let mut args = Vec::new();
        for value in &self.extractor_args {
            args.push("--extractor-args".to_string());
            args.push(value.clone());
        }
        if let Some(cookies) = self.cookies.as_ref().filter(|path| path.is_file()) {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.extend(
            ["--no-check-certificates", "--geo-bypass", "--no-playlist"]
                .iter()
                .map(|flag| flag.to_string()),
        );

        let format = request.format;
        let extension = format.extension().to_string();
        if format.is_audio() {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                extension,
                "--audio-quality".to_string(),
                audio_bitrate(&request.quality).to_string(),
            ]);
        } else {
            args.extend([
                "-f".to_string(),
                format!(
                    "{}+bestaudio/best",
                    video_selector(&request.quality, format)
                ),
                "--merge-output-format".to_string(),
                extension.clone(),
                "--remux-video".to_string(),
                extension,
            ]);
        }

        args.push("--ffmpeg-location".to_string());
        args.push(self.ffmpeg_location.to_string_lossy().into_owned());
        args.extend(self.extra_args.iter().cloned());
        args.push("-o".to_string());
        args.push(output_path.to_string_lossy().into_owned());
        args.push(request.source_url.trim().to_string());

        CommandSpec {
            program: self.binary.clone(),
            args,
            output_path: output_path.to_path_buf(),
        }
    }
}
