use std::collections::HashMap;

use log::debug;
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definitions::{SceneId, CHUNK_BITS, HASH_CHUNKS, MAX_QUERY_BATCH};

//All mutations are batch inserts or predicate-based bulk deletes, and all
//reads are predicate selects. Table existence is assumed; schema management
//belongs to the deployment, not this client.
const INSERT_AUDIO: &str = "\
    INSERT INTO audio_fingerprint_index (sub_hash, scene_id, \"offset\") \
    SELECT u.sub_hash, $1, ($3 + u.ord - 1)::int4 \
    FROM unnest($2::int4[]) WITH ORDINALITY AS u(sub_hash, ord)";

const INSERT_VISUAL: &str = "\
    INSERT INTO visual_fingerprint_index \
        (chunk_value, chunk_index, scene_id, frame_offset, full_hash) \
    SELECT u.chunk_value, u.chunk_index, $1, u.frame_offset, u.full_hash \
    FROM unnest($2::int4[], $3::int2[], $4::int4[], $5::int8[]) \
        AS u(chunk_value, chunk_index, frame_offset, full_hash)";

const LOOKUP_AUDIO: &str = "\
    SELECT sub_hash, scene_id, \"offset\" \
    FROM audio_fingerprint_index \
    WHERE sub_hash = ANY($1)";

//the popularity exclusion runs server-side as a correlated aggregation
//subquery, saving the round trip a separate frequency query would cost
const LOOKUP_AUDIO_FILTERED: &str = "\
    SELECT f.sub_hash, f.scene_id, f.\"offset\" \
    FROM audio_fingerprint_index f \
    WHERE f.sub_hash = ANY($1) \
      AND (SELECT count(DISTINCT g.scene_id) \
           FROM audio_fingerprint_index g \
           WHERE g.sub_hash = f.sub_hash) <= $2";

const LOOKUP_VISUAL_CHUNK: &str = "\
    SELECT scene_id, frame_offset, full_hash \
    FROM visual_fingerprint_index \
    WHERE chunk_index = $1 AND chunk_value = ANY($2)";

const FETCH_SCENE_HASHES: &str = "\
    SELECT full_hash \
    FROM visual_fingerprint_index \
    WHERE scene_id = $1 AND chunk_index = 0 \
    ORDER BY frame_offset";

const DELETE_AUDIO: &str = "DELETE FROM audio_fingerprint_index WHERE scene_id = $1";
const DELETE_VISUAL: &str = "DELETE FROM visual_fingerprint_index WHERE scene_id = $1";

//visual inserts emit HASH_CHUNKS rows per frame hash, so the per-statement
//row ceiling allows fewer hashes per batch than the audio path
const VISUAL_INSERT_BATCH: usize = MAX_QUERY_BATCH / HASH_CHUNKS;

/// Failure while talking to the fingerprint index store.
///
/// Carries the operation that failed. Errors propagate verbatim; there is no
/// internal retry, since backoff policy belongs to the job-processing layer
/// that invoked the operation.
#[derive(Error, Debug)]
#[error("fingerprint index {op} failed: {source}")]
pub struct IndexError {
    op: &'static str,
    #[source]
    source: postgres::Error,
}

impl IndexError {
    fn wrap(op: &'static str) -> impl FnOnce(postgres::Error) -> IndexError {
        move |source| IndexError { op, source }
    }

    /// The operation that failed, e.g. `"audio insert"`.
    pub fn op(&self) -> &'static str {
        self.op
    }
}

/// One audio lookup hit: a scene containing the queried sub-fingerprint and
/// the sub-fingerprint's position within that scene's sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioHit {
    pub scene_id: SceneId,
    pub offset: i32,
}

/// One visual chunk-lookup hit. The full 64-bit hash rides along so the
/// caller can apply the exact Hamming check that 16-bit chunk equality
/// cannot: chunk lookups generate candidates, they never decide matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualHit {
    pub scene_id: SceneId,
    pub frame_offset: i32,
    pub full_hash: u64,
}

/// Split a 64-bit frame hash into four 16-bit chunks, chunk 0 being the
/// least significant bits [0,16).
pub fn hash_chunks(hash: u64) -> [u16; HASH_CHUNKS] {
    let mut chunks = [0u16; HASH_CHUNKS];
    for (i, chunk) in chunks.iter_mut().enumerate() {
        *chunk = (hash >> (i as u32 * CHUNK_BITS)) as u16;
    }
    chunks
}

/// Client for the approximate fingerprint index, a column-oriented store
/// holding one table of audio sub-fingerprints and one of visual hash
/// chunks.
///
/// The index is an optional capability: a deployment without a store
/// endpoint gets the `Disabled` variant, whose operations are explicit
/// no-ops (mutations succeed silently, lookups return nothing), rather than
/// a client that errors on every call.
///
/// Calls are synchronous network round trips, intended to run on
/// worker-pool threads rather than any hot request path. Rows written by an
/// insert become visible on the store's own schedule; a lookup issued
/// immediately after an insert for the same scene may not see it yet. The
/// client also does not serialize per-scene operations: the orchestrating
/// layer must keep at most one mutation in flight per scene id.
pub enum FingerprintIndex {
    Disabled,
    Connected(IndexClient),
}

impl FingerprintIndex {
    /// Connect to the store at `endpoint` (a connection string), or return
    /// the disabled variant when no endpoint is configured.
    pub fn connect(endpoint: Option<&str>) -> Result<Self, IndexError> {
        match endpoint {
            None => Ok(Self::Disabled),
            Some(endpoint) => {
                let client = Client::connect(endpoint, NoTls).map_err(IndexError::wrap("connect"))?;
                Ok(Self::Connected(IndexClient { client }))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Batch-insert one row per audio sub-fingerprint, with each row's
    /// offset being the element's position in `sub_hashes`. No-op on empty
    /// input.
    pub fn insert_audio(&mut self, scene_id: SceneId, sub_hashes: &[i32]) -> Result<(), IndexError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Connected(client) => client.insert_audio(scene_id, sub_hashes),
        }
    }

    /// Batch-insert four chunk rows per visual hash, with each row's
    /// frame_offset being the hash's position in `hashes` and the original
    /// 64-bit hash retained on every row. No-op on empty input.
    pub fn insert_visual(&mut self, scene_id: SceneId, hashes: &[u64]) -> Result<(), IndexError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Connected(client) => client.insert_visual(scene_id, hashes),
        }
    }

    /// Exact lookup of a batch of sub-fingerprint values. Returns every hit
    /// grouped by the queried value; values with no hits are absent from the
    /// map.
    pub fn lookup_audio(
        &mut self,
        sub_hashes: &[i32],
    ) -> Result<HashMap<i32, Vec<AudioHit>>, IndexError> {
        match self {
            Self::Disabled => Ok(HashMap::new()),
            Self::Connected(client) => client.lookup_audio(sub_hashes, None),
        }
    }

    /// As [FingerprintIndex::lookup_audio], but values occurring in more
    /// than `max_scene_freq` distinct scenes are excluded server-side: a
    /// sub-fingerprint shared by that many scenes (silence, a station
    /// jingle) carries no discriminating signal. `max_scene_freq <= 0`
    /// degenerates to the unfiltered lookup.
    pub fn lookup_audio_filtered(
        &mut self,
        sub_hashes: &[i32],
        max_scene_freq: i64,
    ) -> Result<HashMap<i32, Vec<AudioHit>>, IndexError> {
        match self {
            Self::Disabled => Ok(HashMap::new()),
            Self::Connected(client) => {
                let filter = (max_scene_freq > 0).then_some(max_scene_freq);
                client.lookup_audio(sub_hashes, filter)
            }
        }
    }

    /// All rows whose chunk at position `chunk_index` (0..=3) equals any of
    /// `chunk_values`. A candidate-generation step: callers verify hits
    /// against [VisualHit::full_hash] with an exact Hamming check.
    pub fn lookup_visual_chunk(
        &mut self,
        chunk_index: u8,
        chunk_values: &[u16],
    ) -> Result<Vec<VisualHit>, IndexError> {
        debug_assert!((chunk_index as usize) < HASH_CHUNKS);
        match self {
            Self::Disabled => Ok(Vec::new()),
            Self::Connected(client) => client.lookup_visual_chunk(chunk_index, chunk_values),
        }
    }

    /// A scene's full ordered hash sequence, rebuilt from its chunk-0 rows.
    /// Empty when the scene has no visual rows.
    pub fn fetch_scene_hashes(&mut self, scene_id: SceneId) -> Result<Vec<u64>, IndexError> {
        match self {
            Self::Disabled => Ok(Vec::new()),
            Self::Connected(client) => client.fetch_scene_hashes(scene_id),
        }
    }

    /// Remove every audio and visual row for `scene_id`. Idempotent:
    /// deleting a scene with no fingerprints succeeds.
    pub fn delete_scene(&mut self, scene_id: SceneId) -> Result<(), IndexError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Connected(client) => client.delete_scene(scene_id),
        }
    }
}

/// The live connection behind [FingerprintIndex::Connected].
pub struct IndexClient {
    client: Client,
}

impl IndexClient {
    fn insert_audio(&mut self, scene_id: SceneId, sub_hashes: &[i32]) -> Result<(), IndexError> {
        if sub_hashes.is_empty() {
            return Ok(());
        }

        debug!(
            "inserting {} audio fingerprint rows for scene {scene_id}",
            sub_hashes.len()
        );

        for (batch_no, batch) in sub_hashes.chunks(MAX_QUERY_BATCH).enumerate() {
            let base_offset = (batch_no * MAX_QUERY_BATCH) as i32;
            self.client
                .execute(INSERT_AUDIO, &[&scene_id, &batch, &base_offset])
                .map_err(IndexError::wrap("audio insert"))?;
        }

        Ok(())
    }

    fn insert_visual(&mut self, scene_id: SceneId, hashes: &[u64]) -> Result<(), IndexError> {
        if hashes.is_empty() {
            return Ok(());
        }

        debug!(
            "inserting {} visual fingerprint rows for scene {scene_id}",
            hashes.len() * HASH_CHUNKS
        );

        for (batch_no, batch) in hashes.chunks(VISUAL_INSERT_BATCH).enumerate() {
            let rows = batch.len() * HASH_CHUNKS;
            let mut chunk_values: Vec<i32> = Vec::with_capacity(rows);
            let mut chunk_indices: Vec<i16> = Vec::with_capacity(rows);
            let mut frame_offsets: Vec<i32> = Vec::with_capacity(rows);
            let mut full_hashes: Vec<i64> = Vec::with_capacity(rows);

            for (i, hash) in batch.iter().enumerate() {
                let frame_offset = (batch_no * VISUAL_INSERT_BATCH + i) as i32;
                for (chunk_index, chunk) in hash_chunks(*hash).into_iter().enumerate() {
                    chunk_values.push(i32::from(chunk));
                    chunk_indices.push(chunk_index as i16);
                    frame_offsets.push(frame_offset);
                    //the store's hash column is signed 64-bit; reinterpret
                    //the bits rather than the value
                    full_hashes.push(*hash as i64);
                }
            }

            let params: [&(dyn ToSql + Sync); 5] = [
                &scene_id,
                &chunk_values,
                &chunk_indices,
                &frame_offsets,
                &full_hashes,
            ];
            self.client
                .execute(INSERT_VISUAL, &params)
                .map_err(IndexError::wrap("visual insert"))?;
        }

        Ok(())
    }

    fn lookup_audio(
        &mut self,
        sub_hashes: &[i32],
        max_scene_freq: Option<i64>,
    ) -> Result<HashMap<i32, Vec<AudioHit>>, IndexError> {
        let mut hits: HashMap<i32, Vec<AudioHit>> = HashMap::new();

        for batch in sub_hashes.chunks(MAX_QUERY_BATCH) {
            let rows = match max_scene_freq {
                None => self
                    .client
                    .query(LOOKUP_AUDIO, &[&batch])
                    .map_err(IndexError::wrap("audio lookup"))?,
                Some(max_scene_freq) => self
                    .client
                    .query(LOOKUP_AUDIO_FILTERED, &[&batch, &max_scene_freq])
                    .map_err(IndexError::wrap("filtered audio lookup"))?,
            };

            for row in rows {
                let sub_hash: i32 = row.get(0);
                hits.entry(sub_hash).or_default().push(AudioHit {
                    scene_id: row.get(1),
                    offset: row.get(2),
                });
            }
        }

        Ok(hits)
    }

    fn lookup_visual_chunk(
        &mut self,
        chunk_index: u8,
        chunk_values: &[u16],
    ) -> Result<Vec<VisualHit>, IndexError> {
        let chunk_index = i16::from(chunk_index);
        let mut hits = Vec::new();

        for batch in chunk_values.chunks(MAX_QUERY_BATCH) {
            //u16 has no SQL type; chunk values live in an int4 column
            let batch: Vec<i32> = batch.iter().map(|chunk| i32::from(*chunk)).collect();
            let rows = self
                .client
                .query(LOOKUP_VISUAL_CHUNK, &[&chunk_index, &batch])
                .map_err(IndexError::wrap("visual chunk lookup"))?;

            for row in rows {
                let full_hash: i64 = row.get(2);
                hits.push(VisualHit {
                    scene_id: row.get(0),
                    frame_offset: row.get(1),
                    full_hash: full_hash as u64,
                });
            }
        }

        Ok(hits)
    }

    fn fetch_scene_hashes(&mut self, scene_id: SceneId) -> Result<Vec<u64>, IndexError> {
        let rows = self
            .client
            .query(FETCH_SCENE_HASHES, &[&scene_id])
            .map_err(IndexError::wrap("scene hash fetch"))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let full_hash: i64 = row.get(0);
                full_hash as u64
            })
            .collect())
    }

    fn delete_scene(&mut self, scene_id: SceneId) -> Result<(), IndexError> {
        debug!("deleting fingerprint rows for scene {scene_id}");

        self.client
            .execute(DELETE_AUDIO, &[&scene_id])
            .map_err(IndexError::wrap("audio delete"))?;
        self.client
            .execute(DELETE_VISUAL, &[&scene_id])
            .map_err(IndexError::wrap("visual delete"))?;

        Ok(())
    }
}
