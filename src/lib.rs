//! # Overview
//! scene_dup_finder_lib is a library for creating perceptual fingerprints of
//! video scenes and using those fingerprints to find near-duplicate or
//! overlapping scenes across a growing library.
//!
//! # How it works
//! Each scene is reduced to an ordered sequence of 64-bit difference hashes,
//! one per sampled frame: ffmpeg decodes the scene into a stream of tiny 9x8
//! grayscale frames and each frame's brightness gradients become one hash.
//! The audio track is reduced to a chromaprint sub-fingerprint sequence by
//! fpcalc. Both sequences are stored in an external column-oriented
//! fingerprint index, with every visual hash split into four 16-bit chunks
//! so the store can serve them from plain equality lookups.
//!
//! Finding duplicates of a new scene is then a funnel of three stages, each
//! more expensive than the last: an in-process [BloomFilter] rules out
//! hashes that were never indexed at all, chunk lookups against the index
//! produce candidate scenes, and [match_sequences] re-verifies each
//! candidate by sliding the two hash sequences over each other to find the
//! exact alignment and confidence.
//!
//! # High Level API
//! Fingerprint a scene and search the index for overlapping content:
//! ```no_run
//! use scene_dup_finder_lib::{
//!     find_scene_matches, index_scene, FingerprintIndex, MatchParams, SceneHash,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scene = SceneHash::from_path("scene_00042.mkv", 1.0)?;
//! let audio = SceneHash::audio_subfingerprints("scene_00042.mkv")?;
//!
//! let mut index = FingerprintIndex::connect(Some("host=fingerdb user=scenes"))?;
//! index_scene(&mut index, None, 42, scene.hashes(), &audio)?;
//!
//! let matches =
//!     find_scene_matches(42, scene.hashes(), &mut index, None, &MatchParams::default())?;
//! for m in matches {
//!     println!(
//!         "scene {} overlaps scene {} ({:.0}% at offset {})",
//!         m.source_scene, m.matched_scene, m.result.match_percent, m.result.frame_offset
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # The fingerprint index
//! The index client is optional: constructed without an endpoint it becomes
//! an explicit disabled variant whose operations are no-ops, so deployments
//! can run fingerprinting without the store. When enabled, all mutations are
//! synchronous batch inserts and bulk deletes intended to be called from
//! worker-pool threads; the client never retries, leaving backoff policy to
//! the job layer that owns the call.
//!
//! # Limitations
//! The hashes capture brightness gradients of heavily downscaled frames, so
//! they survive recompression, rescaling and minor artifacting, but not
//! rotation, mirroring, large crops or heavy overlays. Sequence alignment
//! assumes both scenes were sampled at the same frame interval.
//!
//! # Prerequisites
//! This crate calls ffmpeg, ffprobe and fpcalc from the command line. All
//! three must be installed and visible on the command line, for example:
//!
//! * Debian-based systems: ```# apt-get install ffmpeg libchromaprint-tools```
//! * Yum-based systems: ```# yum install ffmpeg chromaprint-tools```
//! * Windows: download the ffmpeg and chromaprint installers and add both
//!   to the PATH environment variable
//!
//! Command line invocation avoids both the licensing implications of linking
//! ffmpeg and the absence of leak-free bindings.

pub(crate) mod bloom;
pub(crate) mod definitions;
pub(crate) mod dhash;
pub(crate) mod index_client;
pub(crate) mod scene_hashing;

pub use av_cmdline_utils::CancelToken;
pub use bloom::{BloomFilter, BloomParams, BloomPersistError};
pub use definitions::{SceneId, DEFAULT_FRAME_INTERVAL_SECS, MAX_QUERY_BATCH};
pub use dhash::{compute_dhash, hamming_distance};
pub use index_client::{hash_chunks, AudioHit, FingerprintIndex, IndexError, VisualHit};
pub use scene_hashing::{
    hash_creation_error_kind::HashCreationErrorKind,
    scene_dup_finder::{find_scene_matches, index_scene, reindex_scene, SceneMatch},
    scene_hash::SceneHash,
    sequence_matcher::{match_sequences, MatchParams, MatchResult},
};
