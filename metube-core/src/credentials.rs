//! Installs extractor credentials (a Netscape cookie jar) supplied through
//! the environment as base64. Runs once during startup, before any request
//! can read the file.

use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential blob in {var} is not valid base64: {source}")]
    Decode {
        var: String,
        source: base64::DecodeError,
    },
    #[error("failed to write credentials to {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

/// Decode `encoded` and write it to `dest`, readable by the owner only.
pub fn install(var: &str, encoded: &str, dest: &Path) -> Result<PathBuf, CredentialError> {
    let compact: String = encoded.split_whitespace().collect();
    let decoded = STANDARD
        .decode(compact.as_bytes())
        .map_err(|source| CredentialError::Decode {
            var: var.to_string(),
            source,
        })?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CredentialError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    std::fs::write(dest, decoded).map_err(|source| CredentialError::Io {
        source,
        path: dest.to_path_buf(),
    })?;
    restrict_permissions(dest).map_err(|source| CredentialError::Io {
        source,
        path: dest.to_path_buf(),
    })?;
    Ok(dest.to_path_buf())
}

/// Install credentials from environment variable `var` if it is set.
///
/// Failures are logged and yield `None`; the service then runs
/// unauthenticated.
pub fn install_from_env(var: &str, dest: &Path) -> Option<PathBuf> {
    let encoded = match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return None,
    };
    match install(var, &encoded, dest) {
        Ok(path) => {
            info!(path = %path.display(), "loaded extractor credentials");
            Some(path)
        }
        Err(err) => {
            warn!(error = %err, "failed to load extractor credentials");
            None
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
