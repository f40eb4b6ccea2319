use criterion::criterion_main;
use rand::{rngs::StdRng, Rng, SeedableRng};


criterion_main!(fork_join::benches, budget::benches);

/// Generate `n` deterministic pseudo-random values.
fn values(n: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..n).map(|_| rng.gen_range(0..1_000_000)).collect()
}
