//! Lifecycle supervision of transcoder subprocesses, one per stream.
//!
//! Each running stream is an entry in a concurrent map keyed by stream id.
//! The entry is inserted right after the child has been spawned and is removed
//! by whichever comes first: an explicit [`Supervisor::stop`] or the owning
//! task observing the child's exit. Both paths tolerate the entry being gone.

pub mod command;

pub use command::{CommandTemplate, FfmpegHls, TranscodeCommand};

use crate::error::StreamError;
use crate::store::StreamStore;
use dashmap::DashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extra time a stop request waits beyond the grace period for the forced kill to land.
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct StartedStream {
    pub id: String,
    pub output_dir: PathBuf,
}

struct SessionHandle {
    generation: u64,
    source_url: String,
    pid: Option<u32>,
    started_at: Instant,
    stop: CancellationToken,
    done: CancellationToken,
}

/// Owns the active-session map. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: DashMap<String, SessionHandle>,
    store: StreamStore,
    template: Box<dyn CommandTemplate>,
    grace: Duration,
    limit: Option<(usize, Arc<Semaphore>)>,
    next_generation: AtomicU64,
}

impl Supervisor {
    pub fn new(
        store: StreamStore,
        template: impl CommandTemplate,
        grace: Duration,
        max_streams: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                store,
                template: Box::new(template),
                grace,
                limit: max_streams.map(|max| (max, Arc::new(Semaphore::new(max)))),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &StreamStore {
        &self.inner.store
    }

    /// Starts transcoding `source_url` into a fresh stream directory.
    ///
    /// Returns as soon as the transcoder has been launched. Launch failures
    /// (missing binary, bad arguments) only end up in the stream's log file.
    pub async fn start(&self, source_url: &str) -> Result<StartedStream, StreamError> {
        if source_url.trim().is_empty() {
            return Err(StreamError::InvalidRequest("Missing RTSP URL".into()));
        }

        let permit = match &self.inner.limit {
            Some((max, semaphore)) => Some(
                semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| StreamError::TooManyStreams(*max))?,
            ),
            None => None,
        };

        let id = self.fresh_id();
        let output_dir = self.inner.store.create_stream_dir(&id).await?;
        info!(stream_id = %id, source_url, output_dir = %output_dir.display(), "Starting stream");

        self.launch(&id, source_url, permit).await;

        Ok(StartedStream { id, output_dir })
    }

    /// Stops a running stream: SIGTERM, then SIGKILL once the grace period runs out.
    pub async fn stop(&self, id: &str) -> Result<(), StreamError> {
        let Some((_, handle)) = self.inner.sessions.remove(id) else {
            return Err(StreamError::NotFound);
        };

        info!(
            stream_id = id,
            pid = ?handle.pid,
            source_url = %handle.source_url,
            uptime_secs = handle.started_at.elapsed().as_secs(),
            "Stopping stream"
        );
        handle.stop.cancel();

        let budget = self.inner.grace + KILL_WAIT;
        if tokio::time::timeout(budget, handle.done.cancelled())
            .await
            .is_err()
        {
            error!(stream_id = id, pid = ?handle.pid, "Transcoder did not exit after kill");
        }

        Ok(())
    }

    /// Stops every active stream. Called once the HTTP server has shut down.
    pub async fn shutdown(&self) {
        let ids = self.ids();
        info!(count = ids.len(), "Stopping all streams");
        futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if !self.inner.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Writes the log header, spawns the child, registers it and hands it to
    /// a background task that waits for its exit.
    async fn launch(&self, id: &str, source_url: &str, permit: Option<OwnedSemaphorePermit>) {
        let output_dir = self.inner.store.stream_dir(id);
        let command = self.inner.template.build(source_url, &output_dir);
        let log_path = self.inner.store.log_path(id);

        let mut log = match tokio::fs::File::create(&log_path).await {
            Ok(log) => log,
            Err(error) => {
                error!(stream_id = id, %error, log = %log_path.display(), "Failed to create transcoder log");
                return;
            }
        };

        let header = format!("Running command:\n{}\n\n", command.display_line());
        if let Err(error) = log.write_all(header.as_bytes()).await {
            warn!(stream_id = id, %error, "Failed to write transcoder log header");
        }
        let _ = log.flush().await;
        let log = log.into_std().await;

        let child = match spawn(&command, &log) {
            Ok(child) => child,
            Err(error) => {
                error!(stream_id = id, %error, program = %command.program.display(), "Failed to spawn transcoder");
                let line = match &error {
                    StreamError::ExternalToolMissing(_) => format!("\nError: {error}\n"),
                    _ => format!("\nUnexpected error: {error}\n"),
                };
                append_log(tokio::fs::File::from_std(log), &line, id).await;
                return;
            }
        };

        let pid = child.id();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        self.inner.sessions.insert(
            id.to_string(),
            SessionHandle {
                generation,
                source_url: source_url.to_string(),
                pid,
                started_at: Instant::now(),
                stop: stop.clone(),
                done: done.clone(),
            },
        );
        info!(stream_id = id, ?pid, "Transcoder spawned");

        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let mut child = child;
            let status = child_wait(&mut child, &stop, this.inner.grace, &id).await;
            let line = match &status {
                Ok(status) => match status.code() {
                    Some(code) => format!("\nTranscoder exited with return code {code}\n"),
                    None => format!("\nTranscoder exited: {status}\n"),
                },
                Err(error) => format!("\nUnexpected error: {error}\n"),
            };
            append_log(tokio::fs::File::from_std(log), &line, &id).await;

            if this.deregister(&id, generation) {
                info!(stream_id = %id, ?status, "Transcoder exited, stream removed");
            } else {
                debug!(stream_id = %id, ?status, "Transcoder exited after stop");
            }

            drop(permit);
            done.cancel();
        });
    }

    /// Removes `id` only if it still belongs to `generation`.
    fn deregister(&self, id: &str, generation: u64) -> bool {
        self.inner
            .sessions
            .remove_if(id, |_, handle| handle.generation == generation)
            .is_some()
    }
}

fn spawn(command: &TranscodeCommand, log: &std::fs::File) -> Result<Child, StreamError> {
    let stdout = log.try_clone()?;
    let stderr = log.try_clone()?;
    command
        .to_command(stdout.into(), stderr.into())
        .spawn()
        .map_err(|error| StreamError::from_spawn(error, command.program.clone()))
}

/// Waits for natural exit, or terminates the child once `stop` fires.
async fn child_wait(
    child: &mut Child,
    stop: &CancellationToken,
    grace: Duration,
    id: &str,
) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => terminate(child, grace, id).await,
    }
}

async fn terminate(child: &mut Child, grace: Duration, id: &str) -> std::io::Result<ExitStatus> {
    request_exit(child, id);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                stream_id = id,
                grace_ms = grace.as_millis() as u64,
                "Transcoder ignored termination request, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child, id: &str) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // `None` once the child has been reaped
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(error) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(stream_id = id, pid, %error, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child, id: &str) {
    if let Err(error) = child.start_kill() {
        debug!(stream_id = id, %error, "Terminate failed");
    }
}

async fn append_log(mut log: tokio::fs::File, line: &str, id: &str) {
    if let Err(error) = log.write_all(line.as_bytes()).await {
        warn!(stream_id = id, %error, "Failed to append transcoder log");
    }
    let _ = log.flush().await;
}
