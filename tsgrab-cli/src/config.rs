use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tsgrab_engine::config::DEFAULT_USER_AGENT;
use tsgrab_engine::remux::DEFAULT_REMUXER;
use tsgrab_engine::{ClientConfig, DownloadConfig};

use crate::cli::Args;
use crate::error::{AppError, Result};

const CONFIG_DIR: &str = "tsgrab";
const CONFIG_FILE: &str = "config.toml";

/// Settings from the config file, overridden by command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub output_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            output_dir: None,
            ffmpeg_path: PathBuf::from(DEFAULT_REMUXER),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            headers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads `path`, which must exist, or the default location when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AppError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loading config");
        Self::from_toml(&text).map_err(|reason| AppError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn from_toml(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        let download = &mut self.download;
        if let Some(threads) = args.threads {
            download.max_threads = threads;
        }
        if let Some(kb) = args.chunk_size {
            download.chunk_size_bytes = kb.checked_mul(1024).ok_or_else(|| {
                AppError::InvalidInput(format!("chunk size of {kb} KB is too large"))
            })?;
        }
        if let Some(timeout) = args.timeout {
            download.timeout_secs = timeout;
        }
        if args.original_filenames {
            download.use_original_filenames = true;
        }
        if args.no_speed {
            download.show_speed = false;
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = Some(dir.clone());
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(proxy) = &args.proxy {
            self.proxy = Some(proxy.clone());
        }
        for header in &args.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                AppError::InvalidInput(format!("header `{header}` must look like `Name: value`"))
            })?;
            self.headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.download.validate()?;
        Ok(())
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig {
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            read_timeout: self.download.timeout(),
            ..ClientConfig::default()
        };
        for (name, value) in &self.headers {
            config = config.with_header(name, value)?;
        }
        Ok(config)
    }
}
