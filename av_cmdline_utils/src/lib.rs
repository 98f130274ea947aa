//! Wrappers around the command line interfaces of ffmpeg, ffprobe and fpcalc.
//!
//! The perceptual hashing pipeline only ever needs three things from the AV
//! toolchain: tiny raw grayscale frames (9x8 pixels, one byte each) sampled
//! from a video, the container metadata that ffprobe reports, and the raw
//! chromaprint sub-fingerprint sequence of the audio track. This crate
//! provides exactly those, by spawning the tools as subprocesses and reading
//! their pipes incrementally so memory stays bounded no matter how long the
//! input runs.
//!
//! All three tools must be installed and visible on the command line. No
//! linking against libav/libchromaprint takes place: command line invocation
//! avoids both the licensing questions of statically linking ffmpeg and the
//! lifetime/leak hazards of its C bindings.

pub(crate) mod chromaprint;
pub(crate) mod ffmpeg_error_kind;
pub(crate) mod ffmpeg_ops;
pub(crate) mod ffmpeg_stats;

pub use chromaprint::{fpcalc_is_callable, read_audio_subfingerprints, ChromaprintError};
pub use ffmpeg_error_kind::FfmpegError;
pub use ffmpeg_ops::{
    ffmpeg_and_ffprobe_are_callable, read_single_gray_frame, CancelToken, GrayFrameIter,
    GrayFrameReaderBuilder, GRAY_FRAME_LEN, GRAY_FRAME_X, GRAY_FRAME_Y,
};
pub use ffmpeg_stats::{VideoInfo, VideoInfoError};
