use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_COOKIES_ENV: &str = "YTDLP_COOKIES_B64";
pub const DEFAULT_COOKIES_FILE: &str = "yt_cookies.txt";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetubeConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub downloader: DownloaderSection,
    pub cache: CacheSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub cleanup: CleanupSection,
}

impl MetubeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.scratch_dir)
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.cache_db)
    }

    /// Where decoded credential material is written. Defaults to a file inside
    /// the scratch directory.
    pub fn cookies_path(&self) -> PathBuf {
        match &self.credentials.cookies_file {
            Some(path) => self.resolve_path(path),
            None => self.scratch_dir().join(DEFAULT_COOKIES_FILE),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.ttl_minutes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.downloader.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "downloader.timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.downloader.binary.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "downloader.binary",
                reason: "must not be empty".into(),
            });
        }
        // Sweeping younger files could remove a download that is still running.
        if self.cleanup.enabled && self.cleanup.max_age() <= self.downloader.timeout() {
            return Err(ConfigError::Invalid {
                field: "cleanup.max_age_hours",
                reason: "must exceed downloader.timeout_seconds".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub scratch_dir: String,
    pub cache_db: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderSection {
    pub binary: String,
    pub ffmpeg_location: String,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub extractor_args: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl DownloaderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub backend: CacheBackendKind,
    pub ttl_minutes: u64,
}

impl CacheSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsSection {
    pub env_var: String,
    pub cookies_file: Option<String>,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            env_var: DEFAULT_COOKIES_ENV.to_string(),
            cookies_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupSection {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub max_age_hours: u64,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
            max_age_hours: 12,
        }
    }
}

impl CleanupSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1).saturating_mul(60))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }
}

pub fn load_metube_config<P: AsRef<Path>>(path: P) -> Result<MetubeConfig> {
    let config: MetubeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/metube.toml")
    }

    #[test]
    fn load_fixture_config() {
        let config = load_metube_config(fixture()).expect("config should parse");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(config.cache.ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(config.downloader.binary, "/usr/local/bin/yt-dlp");
        assert_eq!(config.credentials.env_var, DEFAULT_COOKIES_ENV);
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let mut config = load_metube_config(fixture()).unwrap();
        config.paths.base_dir = "/srv/metube".into();
        config.paths.scratch_dir = "scratch".into();
        config.credentials.cookies_file = None;
        assert_eq!(config.scratch_dir(), PathBuf::from("/srv/metube/scratch"));
        assert_eq!(
            config.cookies_path(),
            PathBuf::from("/srv/metube/scratch/yt_cookies.txt")
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = load_metube_config(fixture()).unwrap();
        config.cache.ttl_minutes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "cache.ttl_minutes",
                ..
            })
        ));
    }

    #[test]
    fn sweep_age_must_outlast_download_timeout() {
        let mut config = load_metube_config(fixture()).unwrap();
        config.cleanup.enabled = true;
        config.cleanup.max_age_hours = 0;
        assert!(config.validate().is_err());
        config.cleanup.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn huge_durations_saturate() {
        let mut config = load_metube_config(fixture()).unwrap();
        config.cache.ttl_minutes = u64::MAX;
        config.cleanup.enabled = true;
        config.cleanup.interval_minutes = u64::MAX;
        config.cleanup.max_age_hours = u64::MAX;
        assert_eq!(config.cache.ttl(), Duration::from_secs(u64::MAX));
        assert_eq!(config.cleanup.interval(), Duration::from_secs(u64::MAX));
        assert_eq!(config.cleanup.max_age(), Duration::from_secs(u64::MAX));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_metube_config("/nonexistent/metube.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/metube.toml"));
    }
}
