// src/rng.rs
//
// Process-wide uniform integer source. Seeded once from a nondeterministic
// device (`OsRng`) unless a configuration seed is supplied, in which case
// the whole simulation becomes reproducible (spec.md §9, "Determinism").

use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Mutex;

static RNG: OnceCell<Mutex<StdRng>> = OnceCell::new();

/// Seeds the process-wide RNG. Must be called at most once, before any
/// draw; a no-op (with a debug assertion) if already seeded, so tests and
/// scenario setup can call it defensively.
pub fn seed(seed: Option<u64>) {
    let rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    if RNG.set(Mutex::new(rng)).is_err() {
        debug_assert!(false, "rng::seed called more than once");
    }
}

fn rng() -> &'static Mutex<StdRng> {
    RNG.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

pub fn next_u64() -> u64 {
    rng().lock().expect("rng mutex poisoned").next_u64()
}

pub fn fill_bytes(dest: &mut [u8]) {
    rng().lock().expect("rng mutex poisoned").fill_bytes(dest);
}

/// Uniform integer in `[0, bound)`. `bound` must be nonzero.
pub fn gen_below(bound: u32) -> u32 {
    assert!(bound > 0);
    rng().lock().expect("rng mutex poisoned").next_u32() % bound
}

#[cfg(test)]
mod tests {
    use super::*;

    // The process-wide cell is shared across every test in this binary and
    // tests run concurrently, so these only check properties that hold
    // regardless of who seeded the cell first; determinism from a given
    // seed is instead covered by constructing an independent `StdRng`.
    #[test]
    fn independent_seeded_generators_agree() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn gen_below_stays_in_bounds() {
        for _ in 0..1000 {
            assert!(gen_below(17) < 17);
        }
    }

    #[test]
    fn fill_bytes_fills_the_whole_slice() {
        let mut buf = [0u8; 20];
        fill_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }
}
