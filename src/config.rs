use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration, loaded from CLI args and optionally merged with a TOML file
///
/// Example configuration file content
/// # RTSP to HLS gateway configuration
///
/// # Server configuration
/// listen_address = "0.0.0.0"
/// listen_on_port = 5000
/// public_base_url = "http://localhost:5000"
///
/// # Stream store: segments land in <workspace>/streams/<id>/
/// workspace = "./data"
///
/// # Transcoder
/// ffmpeg_path = "/usr/bin/ffmpeg"
/// stop_grace_secs = 5
/// max_streams = 16          # Optional: unbounded when unset
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to bind the HTTP API on
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to bind the HTTP API on
    #[arg(short, long, default_value_t = 5000)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Base URL clients use to reach this server, used to build `hls_url`
    #[arg(short = 'u', long, default_value = "http://localhost:5000")]
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Working directory, stream output is written to `<workspace>/streams`
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Transcoder binary, resolved through PATH when not absolute
    #[arg(short, long, default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Seconds to wait after a graceful stop request before killing the transcoder
    #[arg(short = 'g', long, default_value_t = 5)]
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Maximum number of concurrently running streams (unbounded when unset)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_streams: Option<usize>,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_on_port: default_port(),
            public_base_url: default_public_base_url(),
            workspace: default_workspace(),
            ffmpeg_path: default_ffmpeg_path(),
            stop_grace_secs: default_stop_grace_secs(),
            max_streams: None,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_address == default_listen_address() {
            self.listen_address = file_config.listen_address;
        }
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.public_base_url == default_public_base_url() {
            self.public_base_url = file_config.public_base_url;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.ffmpeg_path == default_ffmpeg_path() {
            self.ffmpeg_path = file_config.ffmpeg_path;
        }
        if self.stop_grace_secs == default_stop_grace_secs() {
            self.stop_grace_secs = file_config.stop_grace_secs;
        }

        if self.max_streams.is_none() {
            self.max_streams = file_config.max_streams;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.public_base_url.starts_with("http://")
            && !self.public_base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "Public base URL must start with http:// or https://"
            ));
        }

        if self.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcoder path cannot be empty"));
        }

        if self.max_streams == Some(0) {
            return Err(anyhow::anyhow!(
                "max_streams must be greater than 0, omit it to disable the limit"
            ));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_on_port)
    }

    pub fn streams_dir(&self) -> PathBuf {
        Path::new(&self.workspace).join(crate::store::STREAMS_DIR)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

// Default value functions
fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_stop_grace_secs() -> u64 {
    5
}
