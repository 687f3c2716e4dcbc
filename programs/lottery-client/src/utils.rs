use std::sync::{Mutex, MutexGuard};

use solana_program::hash::hash;

/// Locks a mutex, recovering the data if a holder panicked. Every critical
/// section in this crate leaves its data consistent before it can panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// First 8 bytes of `sha256(preimage)`, Anchor's instruction discriminator.
pub(crate) fn sighash(preimage: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash(preimage).to_bytes()[..8]);
    out
}
