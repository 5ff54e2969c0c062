use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::media::OutputFormat;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("media file not found at {path}")]
    MissingFile { path: PathBuf },
    #[error("failed to open media file {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type StreamResult<T> = Result<T, StreamError>;

/// An opened media file ready to be sent to a client as an attachment.
#[derive(Debug)]
pub struct MediaStream {
    file: File,
    len: u64,
    format: OutputFormat,
    file_name: String,
}

impl MediaStream {
    pub async fn open(path: &Path, format: OutputFormat) -> StreamResult<Self> {
        let file = File::open(path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StreamError::MissingFile {
                    path: path.to_path_buf(),
                }
            } else {
                StreamError::Io {
                    source,
                    path: path.to_path_buf(),
                }
            }
        })?;
        let metadata = file.metadata().await.map_err(|source| StreamError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        if !metadata.is_file() {
            return Err(StreamError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("download.{}", format.extension()));
        Ok(Self {
            file,
            len: metadata.len(),
            format,
            file_name,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn content_disposition(&self) -> String {
        let name: String = self
            .file_name
            .chars()
            .filter(|ch| *ch != '"' && *ch != '\\' && !ch.is_control())
            .collect();
        format!("attachment; filename=\"{name}\"")
    }

    /// Chunked stream of the file contents, unmodified.
    pub fn into_body(self) -> ReaderStream<File> {
        ReaderStream::new(self.file)
    }
}
