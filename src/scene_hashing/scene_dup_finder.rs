use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    bloom::BloomFilter,
    definitions::{SceneId, HASH_CHUNKS},
    dhash::hamming_distance,
    index_client::{hash_chunks, FingerprintIndex, IndexError},
    scene_hashing::sequence_matcher::{match_sequences, MatchParams, MatchResult},
};

//a lone chunk collision is almost always noise; two index-confirmed frames
//before paying for a full-sequence fetch
const MIN_CANDIDATE_FRAMES: usize = 2;

/// A confirmed overlap between two scenes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneMatch {
    pub source_scene: SceneId,
    pub matched_scene: SceneId,
    pub result: MatchResult,
}

/// Find indexed scenes that overlap the query sequence.
///
/// Three stages, cheapest first:
/// 1. the bloom filter (when supplied) drops query hashes that nothing has
///    ever indexed. False negatives are impossible, so nothing real is lost;
/// 2. chunked index lookups turn 16-bit chunk equality into candidate
///    frames, each verified against its full 64-bit hash with an exact
///    Hamming check;
/// 3. every candidate scene with enough confirmed frames has its complete
///    sequence fetched and re-verified with [match_sequences], which makes
///    the final call.
///
/// The query scene's own rows may already be in the index; hits on
/// `query_scene` itself are skipped. Results come back best match first.
pub fn find_scene_matches(
    query_scene: SceneId,
    query_hashes: &[u64],
    index: &mut FingerprintIndex,
    bloom: Option<&BloomFilter>,
    params: &MatchParams,
) -> Result<Vec<SceneMatch>, IndexError> {
    if query_hashes.is_empty() || !index.is_enabled() {
        return Ok(Vec::new());
    }

    let candidate_hashes: Vec<u64> = match bloom {
        None => query_hashes.to_vec(),
        Some(filter) => query_hashes
            .iter()
            .copied()
            .filter(|hash| filter.may_contain(*hash))
            .collect(),
    };
    if candidate_hashes.is_empty() {
        return Ok(Vec::new());
    }

    //candidate generation: per chunk position, look up the query hashes'
    //chunk values, then keep only hits whose full hash is close to some
    //query hash
    let mut confirmed_frames: HashMap<SceneId, HashSet<i32>> = HashMap::new();
    for chunk_index in 0..HASH_CHUNKS as u8 {
        let mut chunk_values: Vec<u16> = candidate_hashes
            .iter()
            .map(|hash| hash_chunks(*hash)[chunk_index as usize])
            .collect();
        chunk_values.sort_unstable();
        chunk_values.dedup();

        for hit in index.lookup_visual_chunk(chunk_index, &chunk_values)? {
            if hit.scene_id == query_scene {
                continue;
            }
            let close_to_query = candidate_hashes
                .iter()
                .any(|query| hamming_distance(*query, hit.full_hash) <= params.hamming_threshold);
            if close_to_query {
                confirmed_frames
                    .entry(hit.scene_id)
                    .or_default()
                    .insert(hit.frame_offset);
            }
        }
    }

    //re-verify every plausible candidate against its full stored sequence
    let mut candidate_scenes: Vec<SceneId> = confirmed_frames
        .iter()
        .filter(|(_scene_id, frames)| frames.len() >= MIN_CANDIDATE_FRAMES)
        .map(|(scene_id, _frames)| *scene_id)
        .collect();
    candidate_scenes.sort_unstable();

    let mut matches = Vec::new();
    for scene_id in candidate_scenes {
        let target_hashes = index.fetch_scene_hashes(scene_id)?;
        if let Some(result) = match_sequences(query_hashes, &target_hashes, params) {
            matches.push(SceneMatch {
                source_scene: query_scene,
                matched_scene: scene_id,
                result,
            });
        }
    }

    matches.sort_by(|a, b| {
        b.result
            .match_percent
            .partial_cmp(&a.result.match_percent)
            .expect("match percent is never NaN")
    });
    Ok(matches)
}

/// Index a scene's fingerprints and feed the bloom prefilter.
///
/// The rows become visible to lookups on the store's own schedule; a
/// [find_scene_matches] issued immediately afterwards may not yet see them.
pub fn index_scene(
    index: &mut FingerprintIndex,
    bloom: Option<&BloomFilter>,
    scene_id: SceneId,
    visual_hashes: &[u64],
    audio_subfingerprints: &[i32],
) -> Result<(), IndexError> {
    index.insert_visual(scene_id, visual_hashes)?;
    index.insert_audio(scene_id, audio_subfingerprints)?;

    //bloom last: a hash must never be in the filter without its index rows
    //at least having been sent
    if let Some(filter) = bloom {
        for hash in visual_hashes {
            filter.add(*hash);
        }
    }

    Ok(())
}

/// Replace a scene's fingerprints: the re-scan path. All existing rows for
/// the scene are deleted, then the new sequences inserted.
///
/// The bloom filter keeps the old hashes (bloom filters cannot unlearn);
/// they decay into ordinary false positives. The caller must guarantee no
/// other mutation for this scene id is in flight.
pub fn reindex_scene(
    index: &mut FingerprintIndex,
    bloom: Option<&BloomFilter>,
    scene_id: SceneId,
    visual_hashes: &[u64],
    audio_subfingerprints: &[i32],
) -> Result<(), IndexError> {
    index.delete_scene(scene_id)?;
    index_scene(index, bloom, scene_id, visual_hashes, audio_subfingerprints)
}
