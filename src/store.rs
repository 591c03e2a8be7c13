//! On-disk layout of stream output.
//!
//! One root directory holds a subdirectory per stream id. Each subdirectory
//! receives the transcoder log, the rolling playlist and its segments. Nothing
//! here ever deletes a stream directory; abandoned directories are left for
//! external cleanup.

use std::path::{Component, Path, PathBuf};

pub const STREAMS_DIR: &str = "streams";
pub const LOG_FILE: &str = "ffmpeg.log";
pub const PLAYLIST_FILE: &str = "index.m3u8";

#[derive(Debug, Clone)]
pub struct StreamStore {
    root: PathBuf,
}

impl StreamStore {
    /// Opens the store, creating the root directory when missing.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn stream_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.stream_dir(id).join(LOG_FILE)
    }

    pub fn playlist_path(&self, id: &str) -> PathBuf {
        self.stream_dir(id).join(PLAYLIST_FILE)
    }

    /// Creates the output directory for `id`. Succeeds if it already exists.
    pub async fn create_stream_dir(&self, id: &str) -> std::io::Result<PathBuf> {
        let dir = self.stream_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Maps a request for `filename` inside stream `id` onto the filesystem.
    ///
    /// Returns `None` when either part would escape its directory.
    pub fn resolve(&self, id: &str, filename: &str) -> Option<PathBuf> {
        let id = single_component(id)?;
        let mut path = self.root.join(id);
        let mut has_file = false;
        for component in Path::new(filename).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    has_file = true;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        has_file.then_some(path)
    }
}

fn single_component(id: &str) -> Option<&str> {
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let temp = tempfile::tempdir().unwrap();
        let store = StreamStore::open(temp.path().join(STREAMS_DIR)).unwrap();
        assert!(store.root().is_dir());

        assert_eq!(
            store.log_path("abc"),
            temp.path().join("streams").join("abc").join("ffmpeg.log")
        );
        assert_eq!(
            store.playlist_path("abc"),
            temp.path().join("streams").join("abc").join("index.m3u8")
        );
    }

    #[tokio::test]
    async fn test_create_stream_dir_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let store = StreamStore::open(temp.path()).unwrap();

        let dir = store.create_stream_dir("s1").await.unwrap();
        tokio::fs::write(dir.join("index.m3u8"), "#EXTM3U\n")
            .await
            .unwrap();

        let again = store.create_stream_dir("s1").await.unwrap();
        assert_eq!(dir, again);
        assert!(again.join("index.m3u8").exists());
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let store = StreamStore {
            root: PathBuf::from("/data/streams"),
        };

        assert_eq!(
            store.resolve("s1", "index.m3u8"),
            Some(PathBuf::from("/data/streams/s1/index.m3u8"))
        );
        assert_eq!(
            store.resolve("s1", "sub/seg0.ts"),
            Some(PathBuf::from("/data/streams/s1/sub/seg0.ts"))
        );
        assert_eq!(store.resolve("s1", "../s2/index.m3u8"), None);
        assert_eq!(store.resolve("s1", "/etc/passwd"), None);
        assert_eq!(store.resolve("s1", ""), None);
        assert_eq!(store.resolve("..", "index.m3u8"), None);
        assert_eq!(store.resolve("a/b", "index.m3u8"), None);
        assert_eq!(store.resolve("", "index.m3u8"), None);
    }
}
