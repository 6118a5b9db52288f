use sha2::{Digest, Sha256};

use crate::types::GameError;

/// Draws an unbiased integer in `[0, range)` from `(seed, salt)`.
///
/// The draw width is explicitly 64 bits: each candidate is the first 8 bytes
/// (big-endian) of a SHA-256 digest. A candidate `x` is accepted iff
/// `x < floor(2^64 / range) * range`, which removes modulo bias exactly; on
/// rejection the digest itself is re-hashed and the next candidate is taken
/// from the new digest. Pure function of its inputs — any party holding the
/// seed can reproduce every draw.
pub fn uniform(seed: &[u8; 32], salt: u64, range: u64) -> Result<u64, GameError> {
    if range == 0 {
        return Err(GameError::InvalidRange);
    }

    // 2^64 mod range: the count of draw values above the largest exact
    // multiple of `range`. Candidates in that leftover band are rejected.
    let leftover = ((u64::MAX % range) + 1) % range;

    let mut digest: [u8; 32] = {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(salt.to_be_bytes());
        hasher.finalize().into()
    };

    loop {
        let x = u64::from_be_bytes(digest[0..8].try_into().unwrap());
        if leftover == 0 || x <= u64::MAX - leftover {
            return Ok(x % range);
        }
        let mut hasher = Sha256::new();
        hasher.update(digest);
        digest = hasher.finalize().into();
    }
}
