use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Produces the transcoder invocation for one stream.
pub trait CommandTemplate: Send + Sync + 'static {
    fn build(&self, source_url: &str, output_dir: &Path) -> TranscodeCommand;
}

/// A fully resolved program + argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl TranscodeCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Space-joined command line, written to the stream log for diagnostics.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the tokio command with the given output redirections.
    pub(crate) fn to_command(&self, stdout: Stdio, stderr: Stdio) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        command
    }
}

/// RTSP (over TCP) to rolling HLS with H.264 video.
///
/// 2 second segments, 5 segment window, expired segments deleted.
#[derive(Debug, Clone)]
pub struct FfmpegHls {
    program: PathBuf,
}

impl FfmpegHls {
    pub const SEGMENT_SECONDS: u32 = 2;
    pub const LIST_SIZE: u32 = 5;

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegHls {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl CommandTemplate for FfmpegHls {
    #[rustfmt::skip]
    fn build(&self, source_url: &str, output_dir: &Path) -> TranscodeCommand {
        TranscodeCommand::new(&self.program)
            .args([
                "-rtsp_transport", "tcp",
                "-i", source_url,
                "-c:v", "libx264",
                "-preset", "ultrafast",
                "-tune", "zerolatency",
                "-f", "hls",
            ])
            .arg("-hls_time")
            .arg(Self::SEGMENT_SECONDS.to_string())
            .arg("-hls_list_size")
            .arg(Self::LIST_SIZE.to_string())
            .args(["-hls_flags", "delete_segments"])
            .arg(output_dir.join(crate::store::PLAYLIST_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_hls_arguments() {
        let command = FfmpegHls::default().build("rtsp://cam/live", Path::new("/data/streams/s1"));

        assert_eq!(command.program, PathBuf::from("ffmpeg"));
        assert_eq!(
            command.display_line(),
            "ffmpeg -rtsp_transport tcp -i rtsp://cam/live -c:v libx264 -preset ultrafast \
             -tune zerolatency -f hls -hls_time 2 -hls_list_size 5 \
             -hls_flags delete_segments /data/streams/s1/index.m3u8"
        );
    }

    #[test]
    fn test_source_url_is_a_single_argument() {
        let url = "rtsp://user:p w@cam/live; rm -rf /";
        let command = FfmpegHls::new("/usr/bin/ffmpeg").build(url, Path::new("/tmp/s"));

        let position = command
            .args
            .iter()
            .position(|arg| arg == "-i")
            .unwrap();
        assert_eq!(command.args[position + 1], OsString::from(url));
    }
}
