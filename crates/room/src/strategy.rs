//! Responder selection
//!
//! When a transcript arrives with no active speaker, the arbiter picks one
//! eligible agent to answer. Selection is a replaceable strategy; the
//! default is uniform-random over the eligible set.

use rand::seq::SliceRandom;

/// Picks the responding agent among eligible (listening) agents
pub trait ResponderStrategy: Send + Sync {
    fn select(&self, eligible: &[String]) -> Option<String>;
}

/// Uniform-random selection
#[derive(Debug, Default)]
pub struct UniformRandom;

impl ResponderStrategy for UniformRandom {
    fn select(&self, eligible: &[String]) -> Option<String> {
        eligible.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Always the first eligible agent; deterministic, for tests
#[derive(Debug, Default)]
pub struct FirstEligible;

impl ResponderStrategy for FirstEligible {
    fn select(&self, eligible: &[String]) -> Option<String> {
        eligible.first().cloned()
    }
}
