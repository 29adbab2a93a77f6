//! SecurityAccess seed/key unlock (§4.3, §9): a legacy BMW ECU accepts one
//! of several undocumented seed->key algorithms depending on production
//! date and variant, so the client tries each registered algorithm in turn
//! rather than hard-coding a single one.
//!
//! Mirrors the try-all-then-fail posture of a node that walks a registry of
//! candidate handlers until one is accepted: the ordering is configuration
//! (a `Vec`, not a hard-coded `match`), and the real coefficients are
//! engineering placeholders here since they are proprietary and
//! undocumented — the registry is the grounded contract, not the arithmetic.

use crate::error::{DiagnosticError, NegativeResponseCode};
use std::time::Duration;

/// Number of full passes through the configured algorithm list attempted
/// before the controller's lockout is treated as final (§4.3's "three
/// consecutive key failures"). Deliberately independent of how many
/// algorithms are registered, so growing the registry never silently
/// starves the algorithms at the end of the list.
pub const MAX_LOCKOUT_PASSES: u8 = 3;

/// One seed-to-key transform. Implementations are deliberately simple
/// placeholders standing in for the proprietary, reverse-engineered
/// constants a real flashing tool would carry.
pub trait SeedKeyAlgorithm: Send {
    /// Human-readable name used in logs and in `security.algorithm_order`
    /// config entries when an algorithm is tried.
    fn name(&self) -> &'static str;

    /// The fixed SecurityAccess sub-function slot this algorithm's seed
    /// request/send-key pair lives at, independent of try-order position.
    fn slot(&self) -> usize;

    /// Compute the key for a given seed.
    fn compute_key(&self, seed: u32) -> u32;
}

/// Legacy algorithm "A".
pub struct AlgorithmA;
impl SeedKeyAlgorithm for AlgorithmA {
    fn name(&self) -> &'static str {
        "A"
    }
    fn slot(&self) -> usize {
        0
    }
    fn compute_key(&self, seed: u32) -> u32 {
        seed.rotate_left(7) ^ 0x4BAD_C0DE
    }
}

/// Legacy algorithm "B".
pub struct AlgorithmB;
impl SeedKeyAlgorithm for AlgorithmB {
    fn name(&self) -> &'static str {
        "B"
    }
    fn slot(&self) -> usize {
        1
    }
    fn compute_key(&self, seed: u32) -> u32 {
        seed.wrapping_mul(0x1000_0001).rotate_right(11)
    }
}

/// Legacy algorithm "C".
pub struct AlgorithmC;
impl SeedKeyAlgorithm for AlgorithmC {
    fn name(&self) -> &'static str {
        "C"
    }
    fn slot(&self) -> usize {
        2
    }
    fn compute_key(&self, seed: u32) -> u32 {
        (!seed).wrapping_add(0x0BAD_F00D)
    }
}

/// The "RFTX" variant algorithm, observed on some late-production units.
pub struct AlgorithmRftx;
impl SeedKeyAlgorithm for AlgorithmRftx {
    fn name(&self) -> &'static str {
        "RFTX"
    }
    fn slot(&self) -> usize {
        3
    }
    fn compute_key(&self, seed: u32) -> u32 {
        seed.swap_bytes().wrapping_sub(0x5A5A_5A5A)
    }
}

/// Looks up the registered algorithm named `name` ("A", "B", "C", "RFTX").
pub fn algorithm_for_name(name: &str) -> Option<Box<dyn SeedKeyAlgorithm>> {
    match name {
        "A" => Some(Box::new(AlgorithmA)),
        "B" => Some(Box::new(AlgorithmB)),
        "C" => Some(Box::new(AlgorithmC)),
        "RFTX" => Some(Box::new(AlgorithmRftx)),
        _ => None,
    }
}

/// Builds the try-order from `security.algorithm_order` config entries
/// (§6, §9): ordering is configuration, not a hard-coded sequence.
/// Unrecognised names are skipped rather than failing the whole sequence.
pub fn algorithms_for_order(order: &[String]) -> Vec<Box<dyn SeedKeyAlgorithm>> {
    order.iter().filter_map(|name| algorithm_for_name(name)).collect()
}

/// The built-in try-order: A, B, C, then RFTX.
pub fn default_algorithms() -> Vec<Box<dyn SeedKeyAlgorithm>> {
    vec![Box::new(AlgorithmA), Box::new(AlgorithmB), Box::new(AlgorithmC), Box::new(AlgorithmRftx)]
}

/// The outcome of one security-access attempt cycle, reported for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOutcome {
    /// Seed was zero; the controller considers itself already unlocked.
    AlreadyUnlocked,
    /// The algorithm at this slot produced an accepted key.
    Unlocked { slot: usize },
}

/// Callbacks a caller supplies so this module stays transport-agnostic:
/// `request_seed` sends the request-seed sub-function for `slot` and
/// returns the raw seed bytes; `send_key` sends the computed key and
/// returns `Ok(())` on a positive response or `Err` carrying the NRC.
pub trait SecurityAccessIo {
    fn request_seed(&mut self, slot: usize) -> Result<Vec<u8>, DiagnosticError>;
    fn send_key(&mut self, slot: usize, key: u32) -> Result<(), DiagnosticError>;
}

/// Tries each algorithm in `algorithms`, in order, for up to
/// `MAX_LOCKOUT_PASSES` full passes, until one produces an accepted key.
///
/// Each algorithm is addressed by its own [`SeedKeyAlgorithm::slot`], not by
/// its position in `algorithms`, so the try-order and the physical
/// SecurityAccess sub-function pair it maps to are independent. After a
/// pass in which every algorithm is rejected, the controller's own lockout
/// timer is running (§4.3, ≈10s); `lockout_backoff` is slept before the
/// next pass rather than hammering it with fresh seed requests.
pub fn unlock(
    io: &mut dyn SecurityAccessIo,
    algorithms: &[Box<dyn SeedKeyAlgorithm>],
    lockout_backoff: Duration,
) -> Result<SecurityOutcome, DiagnosticError> {
    for pass in 0..MAX_LOCKOUT_PASSES {
        for algorithm in algorithms {
            let slot = algorithm.slot();
            let seed_bytes = io.request_seed(slot)?;
            let seed = bytes_to_seed(&seed_bytes);
            if seed == 0 {
                return Ok(SecurityOutcome::AlreadyUnlocked);
            }

            let key = algorithm.compute_key(seed);
            match io.send_key(slot, key) {
                Ok(()) => return Ok(SecurityOutcome::Unlocked { slot }),
                Err(DiagnosticError::Negative(nrc)) if nrc == NegativeResponseCode::INVALID_KEY => continue,
                Err(other) => return Err(other),
            }
        }

        if pass + 1 < MAX_LOCKOUT_PASSES && !lockout_backoff.is_zero() {
            std::thread::sleep(lockout_backoff);
        }
    }

    Err(DiagnosticError::SecurityDenied)
}

/// Packs a big-endian seed payload (3 or 4 bytes, as the controller sends
/// it) into a `u32`, zero-extending on the left.
fn bytes_to_seed(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let start = 4usize.saturating_sub(bytes.len());
    buf[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(4)..]);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedIo {
        seeds: Vec<Vec<u8>>,
        accepted_slot: Option<usize>,
        calls: usize,
    }

    impl SecurityAccessIo for ScriptedIo {
        fn request_seed(&mut self, slot: usize) -> Result<Vec<u8>, DiagnosticError> {
            self.calls += 1;
            Ok(self.seeds[slot].clone())
        }

        fn send_key(&mut self, slot: usize, _key: u32) -> Result<(), DiagnosticError> {
            if Some(slot) == self.accepted_slot {
                Ok(())
            } else {
                Err(DiagnosticError::Negative(NegativeResponseCode::INVALID_KEY))
            }
        }
    }

    #[test]
    fn test_zero_seed_means_already_unlocked() {
        let mut io = ScriptedIo { seeds: vec![vec![0x00, 0x00, 0x00, 0x00]], accepted_slot: None, calls: 0 };
        let algorithms = default_algorithms();
        let outcome = unlock(&mut io, &algorithms, Duration::ZERO).unwrap();
        assert_eq!(outcome, SecurityOutcome::AlreadyUnlocked);
    }

    #[test]
    fn test_falls_through_to_second_algorithm() {
        let mut io = ScriptedIo {
            seeds: vec![vec![0x12, 0x34, 0x56, 0x78], vec![0x12, 0x34, 0x56, 0x78]],
            accepted_slot: Some(1),
            calls: 0,
        };
        let algorithms = default_algorithms();
        let outcome = unlock(&mut io, &algorithms, Duration::ZERO).unwrap();
        assert_eq!(outcome, SecurityOutcome::Unlocked { slot: 1 });
    }

    #[test]
    fn test_rftx_is_reachable_as_the_fourth_algorithm() {
        let mut io = ScriptedIo {
            seeds: vec![vec![1, 2, 3, 4]; 4],
            accepted_slot: Some(3),
            calls: 0,
        };
        let algorithms = default_algorithms();
        let outcome = unlock(&mut io, &algorithms, Duration::ZERO).unwrap();
        assert_eq!(outcome, SecurityOutcome::Unlocked { slot: 3 });
    }

    #[test]
    fn test_lockout_after_three_passes_all_rejected() {
        let mut io = ScriptedIo {
            seeds: vec![vec![1, 2, 3, 4]; 4],
            accepted_slot: None,
            calls: 0,
        };
        let algorithms = default_algorithms();
        let err = unlock(&mut io, &algorithms, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DiagnosticError::SecurityDenied));
        assert_eq!(io.calls, algorithms.len() * MAX_LOCKOUT_PASSES as usize);
    }

    #[test]
    fn test_algorithms_for_order_respects_configured_sequence() {
        let order = vec!["RFTX".to_string(), "A".to_string()];
        let algorithms = algorithms_for_order(&order);
        assert_eq!(algorithms.len(), 2);
        assert_eq!(algorithms[0].slot(), 3);
        assert_eq!(algorithms[1].slot(), 0);
    }

    #[test]
    fn test_algorithms_for_order_skips_unknown_names() {
        let order = vec!["BOGUS".to_string(), "C".to_string()];
        let algorithms = algorithms_for_order(&order);
        assert_eq!(algorithms.len(), 1);
        assert_eq!(algorithms[0].name(), "C");
    }
}
