//! Shared fixtures for the cross-crate tests under `tests/`.

use domains::VoterIdentity;

/// A distinct, well-formed identity per `n`.
pub fn voter(n: u64) -> VoterIdentity {
    VoterIdentity::new(format!("{n:064x}"), format!("{:064x}", n + 1_000_000))
}
