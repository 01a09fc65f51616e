use rand::Rng;
use std::time::Duration;

/// Generates a random election timeout in `[min_ms, max_ms)`, re-drawn on
/// every ticker iteration so peers don't stay in lockstep.
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..max_ms);
    Duration::from_millis(timeout_ms)
}
