use crate::definitions::{DHASH_FRAME_BYTES, DHASH_GRID_COLS, DHASH_GRID_ROWS};

/// Compute the 64-bit difference hash of one raw grayscale frame.
///
/// The input is 8 rows of 9 pixels, row major, one byte per pixel. For each
/// row, each of the first 8 pixels is compared against its right-hand
/// neighbour: bit `row*8 + col` is set when the left pixel is the brighter
/// of the pair. The ninth column only ever serves as the comparison target
/// for column 7. Encoding brightness gradients rather than absolute levels
/// is what makes the hash stable under recompression and rescaling.
///
/// A buffer of any other length yields 0 rather than an error. Callers that
/// have not validated the length beforehand must treat an all-zero hash as
/// suspect.
pub fn compute_dhash(pixels: &[u8]) -> u64 {
    if pixels.len() != DHASH_FRAME_BYTES {
        return 0;
    }

    let mut hash = 0u64;
    for (row, row_pixels) in pixels.chunks_exact(DHASH_GRID_COLS).enumerate() {
        for col in 0..DHASH_GRID_ROWS {
            if row_pixels[col] > row_pixels[col + 1] {
                hash |= 1 << (row * 8 + col);
            }
        }
    }

    hash
}

/// The number of differing bits between two frame hashes. Symmetric, in the
/// range 0..=64.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod test {
    use rand::prelude::*;

    use super::*;

    #[test]
    fn test_all_equal_pixels_hash_to_zero() {
        for level in [0u8, 1, 127, 255] {
            let pixels = [level; DHASH_FRAME_BYTES];
            assert_eq!(0, compute_dhash(&pixels));
        }
    }

    #[test]
    fn test_strictly_decreasing_rows_hash_to_all_ones() {
        //every left pixel brighter than its right neighbour: all 64 bits set
        let mut pixels = Vec::with_capacity(DHASH_FRAME_BYTES);
        for _row in 0..DHASH_GRID_ROWS {
            pixels.extend((0..DHASH_GRID_COLS as u8).map(|col| 100 - col));
        }
        assert_eq!(u64::MAX, compute_dhash(&pixels));
    }

    #[test]
    fn test_strictly_increasing_rows_hash_to_zero() {
        let mut pixels = Vec::with_capacity(DHASH_FRAME_BYTES);
        for _row in 0..DHASH_GRID_ROWS {
            pixels.extend((0..DHASH_GRID_COLS as u8).map(|col| 100 + col));
        }
        assert_eq!(0, compute_dhash(&pixels));
    }

    #[test]
    fn test_single_brighter_pixel_sets_exactly_its_bit() {
        //raising one pixel above its right neighbour must set bit row*8+col
        //and nothing else. (the raised pixel's own left neighbour stays
        //dimmer than it, which sets no bit)
        for row in 0..DHASH_GRID_ROWS {
            for col in 0..DHASH_GRID_ROWS {
                let mut pixels = [100u8; DHASH_FRAME_BYTES];
                pixels[row * DHASH_GRID_COLS + col] = 101;

                let expected = 1u64 << (row * 8 + col);
                assert_eq!(
                    expected,
                    compute_dhash(&pixels),
                    "row {row} col {col}"
                );
            }
        }
    }

    #[test]
    fn test_malformed_lengths_hash_to_zero() {
        //one pixel pair would produce a set bit were the buffer well-formed
        let mut pixels = vec![100u8; DHASH_FRAME_BYTES + 1];
        pixels[0] = 200;

        assert_eq!(0, compute_dhash(&[]));
        assert_eq!(0, compute_dhash(&pixels[..DHASH_FRAME_BYTES - 1]));
        assert_eq!(0, compute_dhash(&pixels));
    }

    #[test]
    fn test_hamming_distance_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        for _i in 0..1_000 {
            let x: u64 = rng.gen();
            assert_eq!(0, hamming_distance(x, x));
        }
    }

    #[test]
    fn test_hamming_distance_full() {
        assert_eq!(64, hamming_distance(0, u64::MAX));
    }

    #[test]
    fn test_hamming_distance_symmetry() {
        let mut rng = StdRng::seed_from_u64(2);
        for _i in 0..1_000 {
            let a: u64 = rng.gen();
            let b: u64 = rng.gen();
            assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
        }
    }

    #[test]
    fn test_hamming_distance_single_bit() {
        for bit in 0..64 {
            let base: u64 = 0xA5A5_A5A5_A5A5_A5A5;
            assert_eq!(1, hamming_distance(base, base ^ (1 << bit)));
        }
    }
}
