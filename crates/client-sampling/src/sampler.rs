//! Seeded client sampling
//!
//! Picks the participants of a round from the clients available at its start.

use fed_core::{ClientId, Error, Result, SamplingPolicy};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random client sampler
///
/// Two samplers built with the same seed return the same selections when
/// given the same sequence of candidate sets.
#[derive(Debug)]
pub struct Sampler {
    /// Random source, advanced on every draw
    rng: Mutex<ChaCha8Rng>,

    /// Seed the random source started from
    seed: u64,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    /// Create a sampler with a random seed
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Create a sampler with a specific seed for reproducibility
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            seed,
        }
    }

    /// Get the seed for reproducibility
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Select clients without replacement
    ///
    /// Draws `max(min_clients, ceil(fraction * n))` clients, capped at `n`,
    /// from the `n` distinct candidates. Fails with
    /// [`Error::InsufficientClients`] when fewer than `min_available`
    /// candidates are given.
    pub fn sample<'a, I>(&self, available: I, policy: &SamplingPolicy) -> Result<Vec<ClientId>>
    where
        I: IntoIterator<Item = &'a ClientId>,
    {
        policy.validate()?;

        // Candidate order must not depend on how the caller collected them
        let mut candidates: Vec<&ClientId> = available.into_iter().collect();
        candidates.sort();
        candidates.dedup();

        if candidates.len() < policy.min_available {
            tracing::warn!(
                available = candidates.len(),
                required = policy.min_available,
                "Not enough clients available for sampling"
            );
            return Err(Error::InsufficientClients {
                available: candidates.len(),
                required: policy.min_available,
            });
        }

        let size = policy.sample_size(candidates.len());
        let indices = {
            let mut rng = self.rng.lock();
            rand::seq::index::sample(&mut *rng, candidates.len(), size)
        };

        let selected: Vec<ClientId> = indices
            .into_iter()
            .map(|i| candidates[i].clone())
            .collect();

        tracing::debug!(
            available = candidates.len(),
            selected = selected.len(),
            "Sampled clients"
        );

        Ok(selected)
    }
}
