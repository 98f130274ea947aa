use std::{
    ffi::OsStr,
    io::prelude::*,
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

#[cfg(target_family = "windows")]
use std::os::windows::process::CommandExt;

use wait_timeout::ChildExt;
use FfmpegCommandName::*;

use crate::*;

/// Width in pixels of the raw grayscale frames ffmpeg is asked to emit.
/// The ninth column exists only as the rightmost comparison target for the
/// difference hash; it never receives a hash bit of its own.
pub const GRAY_FRAME_X: usize = 9;

/// Height in pixels of the raw grayscale frames.
pub const GRAY_FRAME_Y: usize = 8;

/// Size of one raw frame on the pipe: 9x8 single-byte gray pixels, row major.
pub const GRAY_FRAME_LEN: usize = GRAY_FRAME_X * GRAY_FRAME_Y;

const FFPROBE_TIMEOUT_SECS: u64 = 60;

//sometimes ffmpeg creates very long error messages. Limit them to the first
//500 characters.
const STDERR_TRUNCATE_CHARS: usize = 500;

//how long to wait for a killed subprocess to actually exit before giving up
//on reaping it
const KILL_WAIT_SECS: u64 = 5;

/// Cooperative cancellation flag for an in-flight subprocess invocation.
///
/// Clone one half into whatever owns the extraction and keep the other;
/// `cancel` causes the reading side to kill the subprocess and wait for it
/// to exit at its next check, which happens between reads of the output
/// pipe.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FfmpegCommandName {
    Ffprobe,
    Ffmpeg,
}

impl FfmpegCommandName {
    fn as_os_str(&self) -> &'static OsStr {
        match self {
            Self::Ffprobe => OsStr::new("ffprobe"),
            Self::Ffmpeg => OsStr::new("ffmpeg"),
        }
    }
}

fn spawn_av_command(name: FfmpegCommandName, args: &[&OsStr]) -> Result<Child, FfmpegError> {
    let mut command = Command::new(name.as_os_str());
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    //do not spawn a command window on windows when in a gui application
    #[cfg(target_family = "windows")]
    command.creation_flags(winapi::um::winbase::CREATE_NO_WINDOW);

    command.spawn().map_err(|e| match e.kind() {
        //shell failed to execute the command. Separate out FileNotFound from all other errors
        //as by far the most likely cause is ffmpeg is not installed.
        std::io::ErrorKind::NotFound => FfmpegError::FfmpegNotFound,
        _ => FfmpegError::Io(format!("{:?}", e.kind())),
    })
}

//Drain stderr on its own thread. ffmpeg blocks once the stderr pipe fills,
//so it must be consumed even when nobody ends up looking at it.
fn drain_stderr(child: &mut Child) -> JoinHandle<Vec<u8>> {
    let mut stderr = child.stderr.take().expect("stderr was piped");
    std::thread::spawn(move || {
        let mut acc = Vec::new();
        let _read_error = stderr.read_to_end(&mut acc);
        acc
    })
}

fn truncate_stderr(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .chars()
        .take(STDERR_TRUNCATE_CHARS)
        .collect()
}

fn io_error(e: &std::io::Error) -> FfmpegError {
    FfmpegError::Io(format!("{:?}", e.kind()))
}

// to prevent accumulation of zombie processes, kill and reap the subprocess
// whenever a stream ends early
fn kill_and_reap(child: &mut Child) {
    let _kill_error = child.kill();
    let _wait_error = child.wait_timeout(Duration::from_secs(KILL_WAIT_SECS));
}

/// Run ffprobe to completion and return its stdout. Nonzero exit status
/// becomes [FfmpegError::FfmpegInternal] carrying the captured stderr.
pub(crate) fn run_ffprobe(args: &[&OsStr]) -> Result<Vec<u8>, FfmpegError> {
    let mut child = spawn_av_command(Ffprobe, args)?;
    let stderr_thread = drain_stderr(&mut child);

    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stdout = Vec::new();
    stdout_pipe
        .read_to_end(&mut stdout)
        .map_err(|e| io_error(&e))?;

    let status = match child.wait_timeout(Duration::from_secs(FFPROBE_TIMEOUT_SECS)) {
        Err(e) => {
            kill_and_reap(&mut child);
            return Err(io_error(&e));
        }
        Ok(None) => {
            kill_and_reap(&mut child);
            return Err(FfmpegError::Timeout);
        }
        Ok(Some(status)) => status,
    };

    let stderr = stderr_thread.join().unwrap_or_default();
    if status.success() {
        Ok(stdout)
    } else {
        Err(FfmpegError::FfmpegInternal(truncate_stderr(&stderr)))
    }
}

pub(crate) fn get_video_stats(src_path: &Path) -> Result<String, FfmpegError> {
    #[rustfmt::skip]
    let args = &[
        OsStr::new("-v"),            OsStr::new("quiet"),
        OsStr::new("-show_format"),
        OsStr::new("-show_streams"),
        OsStr::new("-print_format"), OsStr::new("json"),
        src_path.as_os_str(),
    ];

    let stdout = run_ffprobe(args)?;

    String::from_utf8(stdout).map_err(|_| FfmpegError::Utf8Conversion)
}

pub fn ffmpeg_and_ffprobe_are_callable() -> bool {
    if run_ffprobe(&[OsStr::new("-version")]).is_err() {
        return false;
    }

    //ffprobe is callable; now check ffmpeg.
    let Ok(mut child) = spawn_av_command(Ffmpeg, &[OsStr::new("-version")]) else {
        return false;
    };
    let _stderr = drain_stderr(&mut child);
    let _stdout = child.stdout.take();
    matches!(
        child.wait_timeout(Duration::from_secs(FFPROBE_TIMEOUT_SECS)),
        Ok(Some(status)) if status.success()
    )
}

/// Decode exactly one 9x8 grayscale frame at `timestamp_secs` and return its
/// 72 raw bytes.
///
/// Unlike the streaming reader this fails hard on every problem: a nonzero
/// exit status (stderr attached), the wrong number of bytes on the pipe, or
/// cancellation. There is no partial result to salvage from a single frame.
pub fn read_single_gray_frame(
    src_path: impl AsRef<Path>,
    timestamp_secs: f64,
    cancel: &CancelToken,
) -> Result<[u8; GRAY_FRAME_LEN], FfmpegError> {
    let ts_string = format!("{timestamp_secs}");
    let filter_string = format!("scale={GRAY_FRAME_X}:{GRAY_FRAME_Y}");

    #[rustfmt::skip]
    let args = &[
        OsStr::new("-hide_banner"),
        OsStr::new("-loglevel"), OsStr::new("error"),
        OsStr::new("-nostats"),
        OsStr::new("-threads"),  OsStr::new("1"),
        OsStr::new("-ss"),       OsStr::new(&ts_string),
        OsStr::new("-i"),        src_path.as_ref().as_os_str(),
        OsStr::new("-vframes"),  OsStr::new("1"),
        OsStr::new("-vf"),       OsStr::new(&filter_string),
        OsStr::new("-pix_fmt"),  OsStr::new("gray"),
        OsStr::new("-c:v"),      OsStr::new("rawvideo"),
        OsStr::new("-f"),        OsStr::new("rawvideo"),
        OsStr::new("-"),
    ];

    let mut child = spawn_av_command(Ffmpeg, args)?;
    let stderr_thread = drain_stderr(&mut child);
    let mut stdout = child.stdout.take().expect("stdout was piped");

    let mut acc = Vec::with_capacity(GRAY_FRAME_LEN);
    let mut read_buf = [0u8; GRAY_FRAME_LEN];
    loop {
        if cancel.is_cancelled() {
            kill_and_reap(&mut child);
            return Err(FfmpegError::Cancelled);
        }
        match stdout.read(&mut read_buf) {
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(io_error(&e));
            }
            Ok(0) => break,
            Ok(amount) => acc.extend_from_slice(&read_buf[..amount]),
        }
    }

    let status = child.wait().map_err(|e| io_error(&e))?;
    if !status.success() {
        let stderr = stderr_thread.join().unwrap_or_default();
        return Err(FfmpegError::FfmpegInternal(truncate_stderr(&stderr)));
    }

    if acc.len() != GRAY_FRAME_LEN {
        return Err(FfmpegError::TruncatedFrame {
            expected: GRAY_FRAME_LEN,
            got: acc.len(),
        });
    }

    let mut frame = [0u8; GRAY_FRAME_LEN];
    frame.copy_from_slice(&acc);
    Ok(frame)
}

/// Configures a streaming gray-frame decode of a whole video.
///
/// ffmpeg samples one frame every `interval_secs` seconds of source time,
/// scales it to 9x8 grayscale and writes the raw bytes to a pipe, which
/// [GrayFrameIter] reads back one 72-byte frame at a time.
#[derive(Clone, Debug)]
pub struct GrayFrameReaderBuilder {
    src_path: PathBuf,
    interval_secs: f64,
    timeout_secs: Option<u64>,
    cancel: CancelToken,
}

impl GrayFrameReaderBuilder {
    pub fn new(src_path: impl AsRef<Path>) -> Self {
        Self {
            src_path: src_path.as_ref().to_path_buf(),
            interval_secs: 1.0,
            timeout_secs: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    /// Seconds of source time between sampled frames. Must be positive.
    pub fn interval_secs(&mut self, interval_secs: f64) -> &mut Self {
        assert!(interval_secs > 0.0, "interval must be positive");
        self.interval_secs = interval_secs;
        self
    }

    pub fn timeout_secs(&mut self, timeout_secs: u64) -> &mut Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn cancel_token(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;
        self
    }

    pub fn spawn(&self) -> Result<GrayFrameIter, FfmpegError> {
        let filter_string = format!(
            "fps=1/{},scale={GRAY_FRAME_X}:{GRAY_FRAME_Y}",
            self.interval_secs
        );

        #[rustfmt::skip]
        let args = &[
            OsStr::new("-hide_banner"),
            OsStr::new("-loglevel"), OsStr::new("error"),
            OsStr::new("-nostats"),
            OsStr::new("-threads"),  OsStr::new("1"),
            OsStr::new("-i"),        self.src_path.as_os_str(),
            OsStr::new("-vf"),       OsStr::new(&filter_string),
            OsStr::new("-pix_fmt"),  OsStr::new("gray"),
            OsStr::new("-c:v"),      OsStr::new("rawvideo"),
            OsStr::new("-f"),        OsStr::new("rawvideo"),
            OsStr::new("-"),
        ];

        let mut child = spawn_av_command(Ffmpeg, args)?;
        let stderr_thread = drain_stderr(&mut child);
        let stdout = child.stdout.take().expect("stdout was piped");

        Ok(GrayFrameIter {
            child,
            stdout,
            stderr_thread: Some(stderr_thread),
            cancel: self.cancel.clone(),
            deadline: self
                .timeout_secs
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
            frames_read: 0,
            early_stop: None,
            finished: false,
        })
    }
}

/// Iterator over the raw 72-byte frames of one streaming decode.
///
/// Yields frames until the decoder's output pipe reaches end-of-stream, the
/// deadline passes, or the cancel token fires. How the stream ended is
/// reported by [GrayFrameIter::finish]; frames already yielded stay valid
/// whatever the outcome.
#[derive(Debug)]
pub struct GrayFrameIter {
    child: Child,
    stdout: ChildStdout,
    stderr_thread: Option<JoinHandle<Vec<u8>>>,
    cancel: CancelToken,
    deadline: Option<Instant>,
    frames_read: u32,
    early_stop: Option<FfmpegError>,
    finished: bool,
}

impl Iterator for GrayFrameIter {
    type Item = [u8; GRAY_FRAME_LEN];

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut frame = [0u8; GRAY_FRAME_LEN];
        let mut filled = 0;
        while filled < GRAY_FRAME_LEN {
            //cancellation and deadline are both observed between reads of the
            //pipe; frames arrive steadily while the decoder runs, so the
            //check interval is at most one frame
            if self.cancel.is_cancelled() {
                self.stop_early(FfmpegError::Cancelled);
                return None;
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    self.stop_early(FfmpegError::Timeout);
                    return None;
                }
            }

            match self.stdout.read(&mut frame[filled..]) {
                Err(e) => {
                    self.stop_early(io_error(&e));
                    return None;
                }
                Ok(0) => {
                    //end of stream. A partial frame here means the decoder
                    //died mid-write; drop it but remember it for finish()
                    self.finished = true;
                    if filled > 0 {
                        self.early_stop = Some(FfmpegError::TruncatedFrame {
                            expected: GRAY_FRAME_LEN,
                            got: filled,
                        });
                    }
                    return None;
                }
                Ok(amount) => filled += amount,
            }
        }

        self.frames_read += 1;
        Some(frame)
    }
}

impl GrayFrameIter {
    /// The number of whole frames yielded so far.
    pub fn frames_read(&self) -> u32 {
        self.frames_read
    }

    fn stop_early(&mut self, error: FfmpegError) {
        self.finished = true;
        self.early_stop = Some(error);
        kill_and_reap(&mut self.child);
    }

    /// Wait for the decoder to exit and report how the stream ended.
    ///
    /// * `Ok(frames_read)`: the decoder exited cleanly.
    /// * [FfmpegError::Cancelled] / [FfmpegError::Timeout]: the stream was
    ///   stopped from this side; the subprocess has been killed and reaped.
    /// * [FfmpegError::FfmpegInternal]: the decoder exited nonzero; carries
    ///   its stderr. Some inputs have trailing corruption, so callers with at
    ///   least one decoded frame in hand may treat this as a partial success.
    /// * [FfmpegError::TruncatedFrame]: the pipe closed mid-frame.
    pub fn finish(mut self) -> Result<u32, FfmpegError> {
        //a local stop reason (cancel/timeout/io) wins over whatever the exit
        //status would say
        if let Some(error) = self.early_stop.take() {
            return Err(error);
        }

        let status = match self.child.wait_timeout(Duration::from_secs(KILL_WAIT_SECS)) {
            Err(e) => {
                kill_and_reap(&mut self.child);
                return Err(io_error(&e));
            }
            Ok(None) => {
                //EOF on stdout but the process lingers; treat as hung
                kill_and_reap(&mut self.child);
                return Err(FfmpegError::Timeout);
            }
            Ok(Some(status)) => status,
        };

        let stderr = self
            .stderr_thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(self.frames_read)
        } else {
            Err(FfmpegError::FfmpegInternal(truncate_stderr(&stderr)))
        }
    }
}

// to prevent accumulation of zombie processes, reap the return code of the
// decoder here (if finish() has not already done so)
impl Drop for GrayFrameIter {
    fn drop(&mut self) {
        let _kill_error = self.child.kill();
        let _wait_error = self.child.wait();
    }
}
