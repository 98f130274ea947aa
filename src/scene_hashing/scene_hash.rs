use std::path::{Path, PathBuf};

use av_cmdline_utils::{
    read_audio_subfingerprints, read_single_gray_frame, CancelToken, FfmpegError,
    GrayFrameReaderBuilder, VideoInfo,
};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    definitions::DEFAULT_FRAME_INTERVAL_SECS, dhash::compute_dhash,
    scene_hashing::hash_creation_error_kind::HashCreationErrorKind,
};

//hard ceiling on a single streaming decode. Feature-length inputs decode in
//minutes; anything still running after an hour is wedged
const STREAM_TIMEOUT_SECS: u64 = 3600;

/// The ordered perceptual hash sequence of one scene, sampled at a fixed
/// interval of source time.
///
/// Order is significant: the sequence index is the frame's position on the
/// scene's timeline, and alignment between two scenes is found by sliding
/// one sequence over the other. A sequence is computed once when the scene
/// is ingested or re-scanned and stays immutable until the scene is deleted
/// or re-fingerprinted.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct SceneHash {
    hashes: Vec<u64>,
    src_path: PathBuf,
    interval_secs: f64,
}

impl SceneHash {
    /// Hash every sampled frame of the video at `src_path`, one frame per
    /// `interval_secs` seconds of source time.
    pub fn from_path(
        src_path: impl AsRef<Path>,
        interval_secs: f64,
    ) -> Result<Self, HashCreationErrorKind> {
        Self::from_path_inner(src_path.as_ref(), interval_secs, &CancelToken::new(), |_| {})
    }

    /// As [SceneHash::from_path], with a cancellation token and a progress
    /// callback invoked after every decoded frame with a percentage 0..=100.
    ///
    /// The percentage is estimated from the container's declared duration.
    /// When the decoder produces more frames than the estimate allows, the
    /// reported value stays clamped at 100 and a warning is logged: the
    /// container duration and the sample interval disagree, which is worth
    /// investigating rather than hiding.
    pub fn from_path_with_progress(
        src_path: impl AsRef<Path>,
        interval_secs: f64,
        cancel: &CancelToken,
        progress: impl FnMut(u32),
    ) -> Result<Self, HashCreationErrorKind> {
        Self::from_path_inner(src_path.as_ref(), interval_secs, cancel, progress)
    }

    fn from_path_inner(
        src_path: &Path,
        interval_secs: f64,
        cancel: &CancelToken,
        mut progress: impl FnMut(u32),
    ) -> Result<Self, HashCreationErrorKind> {
        //the duration only drives the progress estimate; the stream itself
        //runs to end-of-stream regardless of what ffprobe claims
        let info = VideoInfo::new(src_path).map_err(|error| {
            HashCreationErrorKind::VideoProcessing {
                src_path: src_path.to_path_buf(),
                error,
            }
        })?;
        let expected_frames = (info.duration().as_secs_f64() / interval_secs)
            .ceil()
            .max(1.0) as u64;

        let mut builder = GrayFrameReaderBuilder::new(src_path);
        builder
            .interval_secs(interval_secs)
            .timeout_secs(STREAM_TIMEOUT_SECS)
            .cancel_token(cancel.clone());

        let mut frames =
            builder
                .spawn()
                .map_err(|error| HashCreationErrorKind::VideoProcessing {
                    src_path: src_path.to_path_buf(),
                    error,
                })?;

        let mut hashes = Vec::new();
        let mut over_estimate = false;
        while let Some(frame) = frames.next() {
            hashes.push(compute_dhash(&frame));

            if !over_estimate && hashes.len() as u64 > expected_frames {
                over_estimate = true;
                warn!(
                    "{}: decoded more frames than the {expected_frames} estimated from the container duration; duration metadata and sample interval disagree",
                    src_path.display()
                );
            }
            let pct = (hashes.len() as u64 * 100 / expected_frames).min(100) as u32;
            progress(pct);
        }

        match frames.finish() {
            Ok(_frames_read) => {}
            Err(FfmpegError::Cancelled) => {
                return Err(HashCreationErrorKind::Cancelled(src_path.to_path_buf()))
            }
            Err(error @ FfmpegError::Timeout) => {
                //a wedged decoder invalidates whatever was read; unlike
                //trailing corruption there is no clean prefix to salvage
                return Err(HashCreationErrorKind::VideoProcessing {
                    src_path: src_path.to_path_buf(),
                    error,
                });
            }
            Err(error) if hashes.is_empty() => {
                return Err(HashCreationErrorKind::VideoProcessing {
                    src_path: src_path.to_path_buf(),
                    error,
                });
            }
            Err(error) => {
                //some inputs carry trailing corruption; the frames decoded
                //before the failure are still a usable quality signal
                warn!(
                    "{}: decoder stopped early after {} frames: {error}",
                    src_path.display(),
                    hashes.len()
                );
            }
        }

        if hashes.is_empty() {
            return Err(HashCreationErrorKind::NoFrames(src_path.to_path_buf()));
        }

        Ok(Self {
            hashes,
            src_path: src_path.to_path_buf(),
            interval_secs,
        })
    }

    /// Decode and hash exactly one frame at `timestamp_secs`.
    ///
    /// Fails hard on every decoder problem. The wrong-byte-count degenerate
    /// case of [compute_dhash][crate::compute_dhash] cannot be reached from
    /// here: the decoder wrapper has already checked the frame length.
    pub fn hash_frame_at(
        src_path: impl AsRef<Path>,
        timestamp_secs: f64,
        cancel: &CancelToken,
    ) -> Result<u64, HashCreationErrorKind> {
        let src_path = src_path.as_ref();
        match read_single_gray_frame(src_path, timestamp_secs, cancel) {
            Ok(frame) => Ok(compute_dhash(&frame)),
            Err(FfmpegError::Cancelled) => {
                Err(HashCreationErrorKind::Cancelled(src_path.to_path_buf()))
            }
            Err(error) => Err(HashCreationErrorKind::VideoProcessing {
                src_path: src_path.to_path_buf(),
                error,
            }),
        }
    }

    /// The scene's audio sub-fingerprint sequence, via fpcalc.
    pub fn audio_subfingerprints(
        src_path: impl AsRef<Path>,
    ) -> Result<Vec<i32>, HashCreationErrorKind> {
        let src_path = src_path.as_ref();
        read_audio_subfingerprints(src_path).map_err(|error| {
            HashCreationErrorKind::AudioProcessing {
                src_path: src_path.to_path_buf(),
                error,
            }
        })
    }

    /// Build a SceneHash from an already-computed sequence, e.g. one read
    /// back out of the fingerprint index.
    pub fn from_hashes(hashes: Vec<u64>, src_path: impl AsRef<Path>) -> Self {
        Self {
            hashes,
            src_path: src_path.as_ref().to_path_buf(),
            interval_secs: DEFAULT_FRAME_INTERVAL_SECS,
        }
    }

    /// The ordered frame hashes, earliest first.
    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// The number of hashed frames.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// The path to the video file from which this sequence was created.
    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    /// Seconds of source time between consecutive hashes.
    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }
}
