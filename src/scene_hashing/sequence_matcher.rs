use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    definitions::{DEFAULT_HAMMING_THRESHOLD, DEFAULT_MATCH_THRESHOLD_PCT},
    dhash::hamming_distance,
};

/// Tolerances applied when aligning two hash sequences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchParams {
    /// Per-frame bit budget: two frames within this Hamming distance count
    /// as the same picture. 0 demands bit-identical frames; 64 matches
    /// everything.
    pub hamming_threshold: u32,

    /// Minimum percentage of the shorter sequence that must line up at the
    /// best offset before a match is reported at all.
    pub match_threshold_pct: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            hamming_threshold: DEFAULT_HAMMING_THRESHOLD,
            match_threshold_pct: DEFAULT_MATCH_THRESHOLD_PCT,
        }
    }
}

/// The outcome of aligning two hash sequences.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Share of the shorter sequence's frames that matched at the best
    /// alignment, 0..=100.
    pub match_percent: f64,

    /// Where the overlap begins, in frames. Positive when the matched
    /// region starts later in the target than in the source; negated when
    /// it starts later in the source. Swapping the two arguments flips only
    /// this sign.
    pub frame_offset: i64,

    /// Frames of the shorter sequence within tolerance at the best offset.
    pub matched_frames: usize,

    /// Frames of the shorter sequence that were compared, i.e. its length.
    pub total_frames: usize,
}

/// Slide the shorter of the two sequences across the longer one and report
/// the best alignment, or `None` when nothing clears
/// `params.match_threshold_pct`.
///
/// `None` is the expected "not a duplicate" outcome, not an error. An empty
/// input sequence also yields `None`: nothing can clear a positive threshold
/// against an empty side, so no separate malformed-input case is worth
/// distinguishing.
///
/// The scan is exhaustive over every relative offset, so the reported offset
/// is exact rather than approximate. Scene sequences run to hundreds or low
/// thousands of hashes, short enough that the O(n·m) cost stays cheaper than
/// maintaining any smarter alignment structure.
pub fn match_sequences(
    source: &[u64],
    target: &[u64],
    params: &MatchParams,
) -> Option<MatchResult> {
    if source.is_empty() || target.is_empty() {
        return None;
    }

    //swap-tracked so that the offset sign below reflects the caller's
    //argument order, not the internal shorter/longer order
    let (shorter, longer, swapped) = if source.len() <= target.len() {
        (source, target, false)
    } else {
        (target, source, true)
    };

    let max_offset = longer.len() - shorter.len();
    let (best_offset, best_count) = (0..max_offset + 1)
        .into_par_iter()
        .map(|offset| {
            let matched = shorter
                .iter()
                .zip(&longer[offset..])
                .filter(|(a, b)| hamming_distance(**a, **b) <= params.hamming_threshold)
                .count();
            (offset, matched)
        })
        //ties resolve to the earliest offset, whatever order rayon found
        //them in
        .max_by_key(|&(offset, matched)| (matched, std::cmp::Reverse(offset)))?;

    let match_percent = best_count as f64 * 100.0 / shorter.len() as f64;
    if match_percent < params.match_threshold_pct {
        return None;
    }

    let frame_offset = if swapped {
        -(best_offset as i64)
    } else {
        best_offset as i64
    };

    Some(MatchResult {
        match_percent,
        frame_offset,
        matched_frames: best_count,
        total_frames: shorter.len(),
    })
}

#[cfg(test)]
mod test {
    use rand::prelude::*;

    use super::*;

    fn exact_params(match_threshold_pct: f64) -> MatchParams {
        MatchParams {
            hamming_threshold: 0,
            match_threshold_pct,
        }
    }

    fn random_sequence(rng: &mut StdRng, len: usize) -> Vec<u64> {
        (0..len).map(|_i| rng.gen()).collect()
    }

    #[test]
    fn test_identical_sequences_match_fully() {
        let mut rng = StdRng::seed_from_u64(10);
        for len in [1, 2, 17, 500] {
            let seq = random_sequence(&mut rng, len);

            let result = match_sequences(&seq, &seq, &exact_params(80.0)).unwrap();
            assert_eq!(100.0, result.match_percent);
            assert_eq!(0, result.frame_offset);
            assert_eq!(len, result.matched_frames);
            assert_eq!(len, result.total_frames);
        }
    }

    #[test]
    fn test_contained_sequence_is_found_at_its_offset() {
        //source [h1..h5] inside target [x, x, h1..h5, y]
        let source = [0x11, 0x22, 0x33, 0x44, 0x55];
        let mut target = vec![0xAAAA, 0xBBBB];
        target.extend_from_slice(&source);
        target.push(0xCCCC);

        let result = match_sequences(&source, &target, &exact_params(80.0)).unwrap();
        assert_eq!(2, result.frame_offset);
        assert_eq!(100.0, result.match_percent);
        assert_eq!(5, result.matched_frames);
        assert_eq!(5, result.total_frames);
    }

    #[test]
    fn test_swapping_arguments_flips_only_the_offset_sign() {
        let mut rng = StdRng::seed_from_u64(11);
        let source = random_sequence(&mut rng, 40);
        let mut target = random_sequence(&mut rng, 7);
        target.extend_from_slice(&source);

        let forward = match_sequences(&source, &target, &exact_params(80.0)).unwrap();
        let backward = match_sequences(&target, &source, &exact_params(80.0)).unwrap();

        assert_eq!(7, forward.frame_offset);
        assert_eq!(-7, backward.frame_offset);
        assert_eq!(forward.match_percent, backward.match_percent);
        assert_eq!(forward.matched_frames, backward.matched_frames);
        assert_eq!(forward.total_frames, backward.total_frames);
    }

    #[test]
    fn test_unrelated_sequences_do_not_match() {
        //disjoint value ranges, so zero positions agree at any offset
        let source = (0..50u64).collect::<Vec<_>>();
        let target = (1000..1100u64).collect::<Vec<_>>();

        assert_eq!(None, match_sequences(&source, &target, &exact_params(50.0)));
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        //3 of 5 frames agree at the best offset: 60% sits under an 80%
        //threshold but clears a 50% one
        let source = [0x1, 0x2, 0x3, 0x9999, 0x8888];
        let target = [0x1, 0x2, 0x3, 0x4, 0x5];

        assert_eq!(None, match_sequences(&source, &target, &exact_params(80.0)));

        let result = match_sequences(&source, &target, &exact_params(50.0)).unwrap();
        assert_eq!(3, result.matched_frames);
        assert_eq!(5, result.total_frames);
        assert_eq!(60.0, result.match_percent);
    }

    #[test]
    fn test_empty_input_is_no_match() {
        let seq = [0x1u64, 0x2];
        let empty: [u64; 0] = [];

        assert_eq!(None, match_sequences(&empty, &seq, &exact_params(0.0)));
        assert_eq!(None, match_sequences(&seq, &empty, &exact_params(0.0)));
        assert_eq!(None, match_sequences(&empty, &empty, &exact_params(0.0)));
    }

    #[test]
    fn test_hamming_tolerance_absorbs_noisy_frames() {
        let mut rng = StdRng::seed_from_u64(12);
        let source = random_sequence(&mut rng, 30);

        //flip 3 random bits in every frame: within a threshold of 4,
        //outside a threshold of 2
        let noisy = source
            .iter()
            .map(|hash| {
                let mut noisy_hash = *hash;
                for _i in 0..3 {
                    noisy_hash ^= 1 << rng.gen_range(0..64);
                }
                noisy_hash
            })
            .collect::<Vec<_>>();

        let tolerant = MatchParams {
            hamming_threshold: 4,
            match_threshold_pct: 90.0,
        };
        let result = match_sequences(&source, &noisy, &tolerant).unwrap();
        assert_eq!(0, result.frame_offset);
        assert!(result.match_percent >= 90.0);
    }

    #[test]
    fn test_ties_resolve_to_the_earliest_offset() {
        //every offset matches equally well; the reported one must be
        //deterministic
        let source = [0u64; 3];
        let target = [0u64; 10];

        let result = match_sequences(&source, &target, &exact_params(80.0)).unwrap();
        assert_eq!(0, result.frame_offset);
    }
}
