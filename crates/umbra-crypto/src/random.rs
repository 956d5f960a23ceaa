//! Randomness helpers.
//!
//! All random material used by the overlay flows through this module so the
//! RNG surface stays in one place.

use rand::RngCore;

/// Fill a buffer with cryptographically secure random bytes.
pub fn rand_bytes(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Generate a random `u64`.
#[must_use]
pub fn rand_u64() -> u64 {
    rand::thread_rng().next_u64()
}

/// Generate a random index in `[0, bound)`. Returns 0 for an empty range.
#[must_use]
pub fn rand_index(bound: usize) -> usize {
    if bound == 0 {
        return 0;
    }
    (rand::thread_rng().next_u64() % bound as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_bytes_fills() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rand_bytes(&mut a);
        rand_bytes(&mut b);
        // 2^-256 collision odds; a failure here means the RNG is broken
        assert_ne!(a, b);
    }

    #[test]
    fn test_rand_index_bounds() {
        assert_eq!(rand_index(0), 0);
        for _ in 0..100 {
            assert!(rand_index(7) < 7);
        }
    }
}
