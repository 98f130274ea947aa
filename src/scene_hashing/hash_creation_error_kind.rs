use std::path::PathBuf;

use av_cmdline_utils::{ChromaprintError, FfmpegError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the various reasons why a scene's fingerprints could not be
/// created from a video file.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum HashCreationErrorKind {
    /// The ffmpeg command line tool failed while extracting frames from the
    /// video, before any usable frame was produced. Carries the decoder's
    /// captured stderr inside the error.
    #[error("processing error at {src_path}: {error}")]
    VideoProcessing { src_path: PathBuf, error: FfmpegError },

    /// The decoder ran and exited but produced no frames at all. A stream
    /// with trailing corruption still yields partial hashes; a stream with
    /// zero frames yields nothing worth keeping and is always a hard
    /// failure.
    #[error("no frames decoded from {0}")]
    NoFrames(PathBuf),

    /// The caller cancelled extraction, or its deadline passed, mid-stream.
    /// Distinct from decode failure so retry policies can tell a deliberate
    /// abort from a broken input.
    #[error("cancelled while hashing {0}")]
    Cancelled(PathBuf),

    /// The fpcalc command line tool failed while extracting audio
    /// sub-fingerprints.
    #[error("audio fingerprinting error at {src_path}: {error}")]
    AudioProcessing {
        src_path: PathBuf,
        error: ChromaprintError,
    },
}
