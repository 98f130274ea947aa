// Difference-hash grid (pre hashing). Each decoded frame is 8 rows of 9
// grayscale pixels; the ninth column is only ever a comparison target and
// never receives a hash bit.
pub const DHASH_GRID_COLS: usize = 9;
pub const DHASH_GRID_ROWS: usize = 8;
pub const DHASH_FRAME_BYTES: usize = DHASH_GRID_COLS * DHASH_GRID_ROWS;

// Index chunking. The store indexes low-cardinality equality predicates well
// and 64-bit bit-operations poorly, so every frame hash is stored four times,
// once per 16-bit chunk.
pub const HASH_CHUNKS: usize = 4;
pub const CHUNK_BITS: u32 = 16;

/// The store rejects oversized predicate lists and very large statements;
/// every batched insert or lookup stays at or below this many elements.
pub const MAX_QUERY_BATCH: usize = 10_000;

/// Identifier of a scene, as assigned by the (external) metadata store.
pub type SceneId = i64;

// Matching defaults. A per-frame budget of 10 differing bits out of 64
// absorbs recompression noise while still separating unrelated pictures;
// three quarters of the shorter sequence lining up is a confident overlap.
pub const DEFAULT_HAMMING_THRESHOLD: u32 = 10;
pub const DEFAULT_MATCH_THRESHOLD_PCT: f64 = 75.0;

/// Default seconds of source time between sampled frames during scene
/// fingerprinting.
pub const DEFAULT_FRAME_INTERVAL_SECS: f64 = 1.0;
