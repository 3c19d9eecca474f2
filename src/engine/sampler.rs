//! Token selection from a logits row

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DecodingStrategy;
use crate::pipeline::{derive_seed, GenerationRequest};

/// Index of the largest logit; ties go to the lowest index
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &v) in logits.iter().enumerate() {
        if v > logits[best] {
            best = i;
        }
    }
    best as u32
}

/// Probabilities of `logits / temperature`
pub fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| ((l - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Smallest set of most probable tokens whose cumulative probability reaches
/// `top_p`, most probable first. Never empty for a non-empty input.
pub fn nucleus_candidates(probs: &[f32], top_p: f32) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as u32, p))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut cutoff = indexed.len();
    for (k, &(_, p)) in indexed.iter().enumerate() {
        cumsum += p;
        if cumsum >= top_p {
            cutoff = k + 1;
            break;
        }
    }
    indexed.truncate(cutoff);
    indexed
}

/// Draw one token from unnormalized candidate weights
pub fn sample_from<G: Rng>(candidates: &[(u32, f32)], rng: &mut G) -> u32 {
    let total: f32 = candidates.iter().map(|(_, p)| p).sum();
    let sample = rng.gen::<f32>() * total;

    let mut cumsum = 0.0;
    for &(token, p) in candidates {
        cumsum += p;
        if cumsum > sample {
            return token;
        }
    }
    candidates.last().map(|&(token, _)| token).unwrap_or(0)
}

/// Per-row token selector for one generation request
pub struct Sampler {
    strategy: DecodingStrategy,
    temperature: f32,
    top_k: Option<usize>,
    rng: StdRng,
}

impl Sampler {
    /// Sampler for `row` of a batch; rows draw from independent streams
    pub fn for_row(request: &GenerationRequest, row: usize) -> Self {
        let seed = request.seed.map_or(0, |s| derive_seed(s, row as u64));
        Self {
            strategy: request.strategy,
            temperature: request.temperature,
            top_k: request.top_k,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_token(&mut self, logits: &[f32]) -> u32 {
        let top_p = match self.strategy {
            DecodingStrategy::Greedy => return argmax(logits),
            DecodingStrategy::Nucleus { top_p } => top_p as f32,
        };

        let probs = softmax(logits, self.temperature);
        let mut candidates = nucleus_candidates(&probs, top_p);
        if let Some(k) = self.top_k {
            candidates.truncate(k.max(1));
        }
        sample_from(&candidates, &mut self.rng)
    }
}
