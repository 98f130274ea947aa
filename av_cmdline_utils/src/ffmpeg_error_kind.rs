use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::*;

/// Various causes of failure for ffmpeg/ffprobe functions.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum FfmpegError {
    /// Ffmpeg/Ffprobe command was not found. Make sure Ffmpeg is installed and can be found on the command line.
    #[error("ffmpeg/ffprobe file not found. Make sure ffmpeg/ffprobe are installed and visible on the command line")]
    FfmpegNotFound,

    /// Io error occurred while executing Ffmpeg/Ffprobe command
    #[error("ffmpeg IO error: {0}")]
    Io(String),

    /// Ffmpeg/Ffprobe returned a nonzero exit code. Because ffmpeg sometimes prints long error strings
    /// to stderr, the resulting string contains the first few hundred characters of the error message.
    #[error("internal ffmpeg failure: {0}")]
    FfmpegInternal(String),

    /// Failed to interpret Ffmpeg/Ffprobe output as a utf8-string.
    #[error("utf8 parsing/conversion failure")]
    Utf8Conversion,

    /// The decoder's output pipe closed partway through a frame. A single-frame
    /// read fails hard on this; a streaming read drops the partial frame and
    /// reports it when the stream is finished.
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    TruncatedFrame { expected: usize, got: usize },

    /// The subprocess did not complete within the allowed time. The process
    /// has already been killed and reaped when this is returned.
    #[error("ffmpeg did not complete within the allowed time")]
    Timeout,

    /// The caller's [CancelToken][crate::CancelToken] was triggered mid-stream.
    /// Kept distinct from decode failures so that retry policies can tell a
    /// deliberate abort from a broken input.
    #[error("frame extraction cancelled")]
    Cancelled,

    /// Failed to obtain video information.
    #[error("failed to get video properties")]
    Info(#[from] VideoInfoError),
}
