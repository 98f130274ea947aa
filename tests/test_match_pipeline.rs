use itertools::Itertools;
use rand::prelude::*;
use scene_dup_finder_lib::*;

/// A synthetic scene: a seeded random hash sequence, plus derived variants
/// that stand in for re-encodes and for scenes containing it.
struct SyntheticScene {
    hashes: Vec<u64>,
}

impl SyntheticScene {
    fn new(len: usize, rng: &mut StdRng) -> Self {
        Self {
            hashes: (0..len).map(|_i| rng.gen()).collect(),
        }
    }

    /// The same scene after a lossy re-encode: every frame hash differs by
    /// up to `noise_bits` random bits.
    fn reencoded(&self, noise_bits: u32, rng: &mut StdRng) -> Vec<u64> {
        self.hashes
            .iter()
            .map(|hash| {
                let flips = rng.gen_range(0..=noise_bits);
                let mut noisy = *hash;
                for _i in 0..flips {
                    noisy ^= 1 << rng.gen_range(0..64);
                }
                noisy
            })
            .collect()
    }

    /// A longer scene that contains this one starting at `lead_frames`.
    fn embedded(&self, lead_frames: usize, tail_frames: usize, rng: &mut StdRng) -> Vec<u64> {
        let mut ret: Vec<u64> = (0..lead_frames).map(|_i| rng.gen()).collect();
        ret.extend_from_slice(&self.hashes);
        ret.extend((0..tail_frames).map(|_i| rng.gen::<u64>()));
        ret
    }
}

#[test]
fn test_reencoded_scene_matches_its_original() {
    let mut rng = StdRng::seed_from_u64(100);
    let scene = SyntheticScene::new(300, &mut rng);
    let reencode = scene.reencoded(4, &mut rng);

    let params = MatchParams {
        hamming_threshold: 6,
        match_threshold_pct: 90.0,
    };
    let result = match_sequences(&scene.hashes, &reencode, &params).unwrap();

    assert_eq!(0, result.frame_offset);
    assert_eq!(300, result.total_frames);
    assert!(result.match_percent >= 90.0);
}

#[test]
fn test_scene_is_found_inside_a_longer_recording() {
    let mut rng = StdRng::seed_from_u64(101);
    let scene = SyntheticScene::new(120, &mut rng);
    let recording = scene.embedded(45, 200, &mut rng);

    let params = MatchParams {
        hamming_threshold: 0,
        match_threshold_pct: 95.0,
    };

    let forward = match_sequences(&scene.hashes, &recording, &params).unwrap();
    assert_eq!(45, forward.frame_offset);
    assert_eq!(100.0, forward.match_percent);
    assert_eq!(120, forward.matched_frames);

    //from the recording's point of view the same overlap sits 45 frames
    //into itself
    let backward = match_sequences(&recording, &scene.hashes, &params).unwrap();
    assert_eq!(-45, backward.frame_offset);
    assert_eq!(forward.matched_frames, backward.matched_frames);
}

#[test]
fn test_unrelated_scenes_never_match() {
    let mut rng = StdRng::seed_from_u64(102);

    //random 64-bit frame hashes differ by ~32 bits; a threshold of 10 bits
    //cannot be cleared by chance at these lengths
    let scenes = (0..4)
        .map(|_i| SyntheticScene::new(150, &mut rng))
        .collect::<Vec<_>>();

    let params = MatchParams {
        hamming_threshold: 10,
        match_threshold_pct: 50.0,
    };
    for pair in scenes.iter().combinations(2) {
        assert_eq!(
            None,
            match_sequences(&pair[0].hashes, &pair[1].hashes, &params)
        );
    }
}

#[test]
fn test_bloom_prefilter_passes_every_indexed_hash() {
    let mut rng = StdRng::seed_from_u64(103);
    let filter = BloomFilter::new(BloomParams {
        expected_items: 100_000,
        false_positive_rate: 0.01,
    });

    //index ten scenes' worth of hashes
    let scenes = (0..10)
        .map(|_i| SyntheticScene::new(400, &mut rng))
        .collect::<Vec<_>>();
    for scene in &scenes {
        for hash in &scene.hashes {
            filter.add(*hash);
        }
    }

    //a prefilter that dropped any indexed hash would silently lose matches;
    //every one must pass
    for scene in &scenes {
        for hash in &scene.hashes {
            assert!(filter.may_contain(*hash));
        }
    }
}

#[test]
fn test_bloom_snapshot_survives_a_restart() {
    let mut rng = StdRng::seed_from_u64(104);
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("fingerprint_bloom.snapshot");

    let scene = SyntheticScene::new(1_000, &mut rng);

    //process one: build the filter and flush it on shutdown
    {
        let filter = BloomFilter::new(BloomParams::default());
        for hash in &scene.hashes {
            filter.add(*hash);
        }
        filter.save(&snapshot_path).unwrap();
    }

    //process two: load at startup and answer the same queries
    let filter = BloomFilter::load(&snapshot_path).unwrap();
    for hash in &scene.hashes {
        assert!(filter.may_contain(*hash));
    }
}

#[test]
fn test_chunks_agree_with_hamming_verification() {
    //the index funnel is sound: a frame hash within tolerance of a query
    //shares at least one exact 16-bit chunk whenever fewer than 4 chunks
    //were disturbed, so candidate generation can only over-approximate
    let mut rng = StdRng::seed_from_u64(105);

    for _i in 0..1_000 {
        let original: u64 = rng.gen();

        //disturb at most 3 bits: at most 3 chunks change, at least 1 survives
        let mut noisy = original;
        for _j in 0..rng.gen_range(0..=3) {
            noisy ^= 1 << rng.gen_range(0..64);
        }

        let shared_chunks = hash_chunks(original)
            .iter()
            .zip(hash_chunks(noisy).iter())
            .filter(|(a, b)| a == b)
            .count();
        assert!(
            shared_chunks >= 1,
            "no shared chunk between {original:#x} and {noisy:#x}"
        );
        assert!(hamming_distance(original, noisy) <= 3);
    }
}

#[test]
fn test_disabled_index_pipeline_is_inert_end_to_end() {
    let mut rng = StdRng::seed_from_u64(106);
    let scene = SyntheticScene::new(50, &mut rng);

    let mut index = FingerprintIndex::connect(None).unwrap();
    let bloom = BloomFilter::new(BloomParams::default());

    index_scene(&mut index, Some(&bloom), 1, &scene.hashes, &[]).unwrap();
    let matches = find_scene_matches(
        2,
        &scene.hashes,
        &mut index,
        Some(&bloom),
        &MatchParams::default(),
    )
    .unwrap();

    assert!(matches.is_empty());
}
