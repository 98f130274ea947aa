use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::RwLock,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Sizing parameters for a new [BloomFilter], converted to a bit-array size
/// and hash-round count by the standard optimal-filter formulas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomParams {
    /// How many distinct hashes the filter is expected to hold.
    pub expected_items: usize,
    /// Acceptable probability that [BloomFilter::may_contain] answers true
    /// for a value that was never added, once `expected_items` values are in.
    pub false_positive_rate: f64,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            expected_items: 1_000_000,
            false_positive_rate: 0.01,
        }
    }
}

/// Error type for loading and saving bloom filter snapshots.
#[derive(Error, Debug)]
pub enum BloomPersistError {
    #[error("bloom snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bloom snapshot encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

//the serialized form: the raw bit words plus the two integers needed to
//reconstruct an identical filter
#[derive(Serialize, Deserialize)]
struct BloomSnapshot {
    size: u64,
    hash_fns: u32,
    bits: Vec<u64>,
}

/// A fixed-size bloom filter over 64-bit frame hashes.
///
/// Answers "could this hash already be indexed?" without a round trip to the
/// fingerprint index. False positives occur at roughly the configured rate
/// and cost only a wasted index lookup; false negatives never occur, so a
/// negative answer safely skips the lookup entirely.
///
/// One filter is shared by every fingerprinting worker in the process. The
/// bit array sits behind a reader/writer lock: membership queries (the hot
/// path during ingest) take the shared side and never block each other,
/// insertions take the exclusive side.
///
/// Persistence is a whole-file snapshot via [BloomFilter::save] and
/// [BloomFilter::load]; `add` never touches disk. The owning service loads
/// the snapshot at startup and flushes on shutdown or on a timer.
#[derive(Debug)]
pub struct BloomFilter {
    //number of usable bits; positions are taken modulo this, so the slack in
    //the last word of the array is never addressed
    size: u64,
    hash_fns: u32,
    bits: RwLock<Vec<u64>>,
}

impl BloomFilter {
    /// Create an empty filter sized for `params`:
    /// `size = ceil(-n·ln(p) / ln(2)²)` bits and
    /// `hash_fns = ceil((size/n)·ln(2))` rounds, with a floor of one round.
    pub fn new(params: BloomParams) -> Self {
        let n = params.expected_items.max(1) as f64;
        let p = params.false_positive_rate.clamp(f64::MIN_POSITIVE, 1.0);
        let ln2 = std::f64::consts::LN_2;

        let size = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(1.0) as u64;
        let hash_fns = ((size as f64 / n) * ln2).ceil().max(1.0) as u32;

        let words = size.div_ceil(64) as usize;
        Self {
            size,
            hash_fns,
            bits: RwLock::new(vec![0u64; words]),
        }
    }

    /// Record `value` as seen. Takes the exclusive side of the lock, so two
    /// concurrent `add` calls never interleave their bit writes.
    pub fn add(&self, value: u64) {
        let (h1, h2) = Self::double_hash(value);

        let mut bits = self.bits.write().expect("bloom filter lock poisoned");
        for i in 0..self.hash_fns {
            let pos = Self::bit_position(h1, h2, i, self.size);
            bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// True when every bit derived from `value` is set: the value *may* have
    /// been added before. False means it definitely never was.
    pub fn may_contain(&self, value: u64) -> bool {
        let (h1, h2) = Self::double_hash(value);

        let bits = self.bits.read().expect("bloom filter lock poisoned");
        (0..self.hash_fns).all(|i| {
            let pos = Self::bit_position(h1, h2, i, self.size);
            bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0
        })
    }

    /// The number of bits in the filter.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The number of hash rounds per value.
    pub fn hash_fns(&self) -> u32 {
        self.hash_fns
    }

    //Two 64-bit hashes from one primitive run twice: once over the
    //little-endian bytes of the value and once over the same bytes reversed.
    //The i-th bit position is then h1 + i*h2 mod size.
    fn double_hash(value: u64) -> (u64, u64) {
        let forward = value.to_le_bytes();
        let mut reversed = forward;
        reversed.reverse();
        (xxh3_64(&forward), xxh3_64(&reversed))
    }

    fn bit_position(h1: u64, h2: u64, i: u32, size: u64) -> u64 {
        h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % size
    }

    /// Serialize the whole filter to `path`, overwriting any previous
    /// snapshot. An explicit operation: nothing is persisted automatically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BloomPersistError> {
        let bits = self.bits.read().expect("bloom filter lock poisoned");
        let snapshot = BloomSnapshot {
            size: self.size,
            hash_fns: self.hash_fns,
            bits: bits.clone(),
        };

        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &snapshot)?;
        Ok(())
    }

    /// Reconstruct a filter, bit for bit, from a snapshot written by
    /// [BloomFilter::save].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BloomPersistError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: BloomSnapshot = bincode::deserialize_from(reader)?;

        Ok(Self {
            size: snapshot.size,
            hash_fns: snapshot.hash_fns,
            bits: RwLock::new(snapshot.bits),
        })
    }

    #[cfg(test)]
    pub(crate) fn words(&self) -> Vec<u64> {
        self.bits.read().expect("bloom filter lock poisoned").clone()
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;

    use super::*;

    #[test]
    fn test_sizing_formulas() {
        let filter = BloomFilter::new(BloomParams {
            expected_items: 1_000,
            false_positive_rate: 0.01,
        });

        //-1000 ln(0.01) / ln(2)^2 = 9585.05..., (9586/1000) ln 2 = 6.64...
        assert_eq!(9586, filter.size());
        assert_eq!(7, filter.hash_fns());
    }

    #[test]
    fn test_at_least_one_hash_round() {
        let filter = BloomFilter::new(BloomParams {
            expected_items: 1_000_000,
            false_positive_rate: 0.99,
        });
        assert!(filter.hash_fns() >= 1);
    }

    #[test]
    fn test_no_false_negatives() {
        let mut rng = StdRng::seed_from_u64(3);
        let filter = BloomFilter::new(BloomParams::default());

        let values = (0..10_000).map(|_i| rng.gen::<u64>()).collect::<Vec<_>>();
        for value in &values {
            filter.add(*value);
        }
        for value in &values {
            assert!(filter.may_contain(*value), "false negative for {value:#x}");
        }
    }

    #[test]
    fn test_unseen_values_are_mostly_absent() {
        //not a strict bound check, just a sanity check that the filter
        //discriminates at all at the configured rate
        let mut rng = StdRng::seed_from_u64(4);
        let filter = BloomFilter::new(BloomParams {
            expected_items: 10_000,
            false_positive_rate: 0.01,
        });

        for _i in 0..10_000 {
            filter.add(rng.gen());
        }

        let false_positives = (0..10_000).filter(|_i| filter.may_contain(rng.gen())).count();
        assert!(
            false_positives < 500,
            "false positive rate far above configured: {false_positives}/10000"
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let filter = BloomFilter::new(BloomParams {
            expected_items: 5_000,
            false_positive_rate: 0.001,
        });
        for _i in 0..5_000 {
            filter.add(rng.gen());
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.snapshot");

        filter.save(&path).unwrap();
        let reloaded = BloomFilter::load(&path).unwrap();

        assert_eq!(filter.size(), reloaded.size());
        assert_eq!(filter.hash_fns(), reloaded.hash_fns());
        assert_eq!(filter.words(), reloaded.words());
    }

    #[test]
    fn test_concurrent_add_and_query() {
        let filter = BloomFilter::new(BloomParams::default());

        std::thread::scope(|scope| {
            for thread_no in 0..4u64 {
                let filter = &filter;
                scope.spawn(move || {
                    for i in 0..5_000 {
                        let value = thread_no * 1_000_000 + i;
                        filter.add(value);
                        assert!(filter.may_contain(value));
                    }
                });
            }
        });

        //every thread's values are visible afterwards
        for thread_no in 0..4u64 {
            for i in 0..5_000 {
                assert!(filter.may_contain(thread_no * 1_000_000 + i));
            }
        }
    }
}
