use crate::Config;
use crate::store::StreamStore;
use crate::supervisor::{CommandTemplate, FfmpegHls, Supervisor};
use std::path::Path;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub public_base_url: String,
}

impl AppState {
    /// Builds the state used by the HTTP handlers, running `ffmpeg_path`
    /// for every stream.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_template(config, FfmpegHls::new(&config.ffmpeg_path))
    }

    /// Same as [`AppState::new`] with a custom transcoder invocation.
    pub fn with_template(config: &Config, template: impl CommandTemplate) -> anyhow::Result<Self> {
        let streams_dir = config.streams_dir();
        let store = StreamStore::open(&streams_dir)?;
        info!(
            streams_dir = %streams_dir.display(),
            max_streams = ?config.max_streams,
            "Stream store ready"
        );

        Ok(Self::from_parts(
            Supervisor::new(store, template, config.stop_grace(), config.max_streams),
            &config.public_base_url,
        ))
    }

    pub fn from_parts(supervisor: Supervisor, public_base_url: &str) -> Self {
        Self {
            supervisor,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn streams_dir(&self) -> &Path {
        self.supervisor.store().root()
    }

    /// Playback URL of the rolling playlist for `id`.
    pub fn hls_url(&self, id: &str) -> String {
        format!(
            "{}/streams/{id}/{}",
            self.public_base_url,
            crate::store::PLAYLIST_FILE
        )
    }
}
