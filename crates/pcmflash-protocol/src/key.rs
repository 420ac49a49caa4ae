//! Seed → key transforms. Pure, deterministic, side-effect-free by construction (no I/O, no
//! interior mutability) — §4.4.

use thiserror::Error;

/// Algorithm id used by the mock device and the unit tests: returns the seed unchanged.
pub const ALGORITHM_PASSTHROUGH: u16 = 0xFFFF;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithmError {
    #[error("no key algorithm registered for id {0:#06X}")]
    UnknownAlgorithm(u16),
}

/// `algorithm_id` is looked up from the PCM's operating-system id by the caller (outside this
/// crate); this function only ever sees the resolved id. An id with no registered transform is
/// reported as [`KeyAlgorithmError::UnknownAlgorithm`] rather than silently guessed at.
pub fn key(algorithm_id: u16, seed: u16) -> Result<u16, KeyAlgorithmError> {
    match algorithm_id {
        0 => Ok(key_algorithm_0(seed)),
        1 => Ok(key_algorithm_1(seed)),
        ALGORITHM_PASSTHROUGH => Ok(seed),
        other => Err(KeyAlgorithmError::UnknownAlgorithm(other)),
    }
}

/// Rotate-left-by-3 then XOR with a fixed constant.
fn key_algorithm_0(seed: u16) -> u16 {
    let rotated = seed.rotate_left(3);
    rotated ^ 0x9B2F
}

/// Byte-swap then subtract a fixed constant (wrapping).
fn key_algorithm_1(seed: u16) -> u16 {
    let swapped = seed.swap_bytes();
    swapped.wrapping_sub(0x4A17)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        for alg in [0u16, 1, ALGORITHM_PASSTHROUGH] {
            for seed in [0x0000u16, 0x1234, 0xFFFF, 0xBEEF] {
                assert_eq!(key(alg, seed), key(alg, seed));
            }
        }
    }

    #[test]
    fn passthrough_returns_seed() {
        assert_eq!(key(ALGORITHM_PASSTHROUGH, 0x1234), Ok(0x1234));
    }

    #[test]
    fn distinct_algorithms_usually_disagree() {
        assert_ne!(key(0, 0x1234), key(1, 0x1234));
    }

    #[test]
    fn unknown_algorithm_id_is_an_error() {
        assert_eq!(key(0x2A2A, 0x1234), Err(KeyAlgorithmError::UnknownAlgorithm(0x2A2A)));
    }
}
