//! Prompt batching
//!
//! Partitions an ordered prompt list into batches of bounded size. Every
//! prompt lands in exactly one batch and each batch carries the original
//! indices of its members, so records can always be traced back to their
//! input line regardless of policy or sorting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prompt::Prompt;

/// Invalid batcher settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch size must be positive")]
    ZeroBatchSize,
}

/// How prompts are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Consecutive runs of exactly `batch_size`, with a short final batch
    #[default]
    Uniform,
    /// Uniform, except that `N == batch_size` gives N singleton batches and
    /// `batch_size == 1` gives one batch holding every prompt. Kept to
    /// reproduce earlier output tables.
    Legacy,
}

/// A group of prompts processed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    prompts: Vec<Prompt>,
    indices: Vec<usize>,
}

impl Batch {
    fn new(prompts: Vec<Prompt>) -> Self {
        let indices = prompts.iter().map(Prompt::original_index).collect();
        Self { prompts, indices }
    }

    /// Members in batch order
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    /// Original indices of the members, parallel to `prompts()`
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Mapping from processing order back to input order.
///
/// `order[k]` is the input position of the k-th prompt as processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    /// Keep input order
    pub fn identity(len: usize) -> Self {
        Self {
            order: (0..len).collect(),
        }
    }

    /// Stable sort of positions by key
    pub fn sorted_by_key<T, K, F>(items: &[T], mut key: F) -> Self
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by_key(|&i| key(&items[i]));
        Self { order }
    }

    /// Input position of the prompt processed at `processed`
    pub fn source_position(&self, processed: usize) -> usize {
        self.order[processed]
    }

    /// Processing position of each input position
    pub fn inverse(&self) -> Vec<usize> {
        let mut inverse = vec![0; self.order.len()];
        for (processed, &source) in self.order.iter().enumerate() {
            inverse[source] = processed;
        }
        inverse
    }

    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(i, &s)| i == s)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Result of partitioning a prompt list
#[derive(Debug, Clone)]
pub struct BatchPlan {
    batches: Vec<Batch>,
    permutation: Permutation,
}

impl BatchPlan {
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Index list per batch; concatenated they are a permutation of `[0, N)`
    pub fn index_lists(&self) -> Vec<Vec<usize>> {
        self.batches.iter().map(|b| b.indices().to_vec()).collect()
    }

    /// Batch sizes in order
    pub fn sizes(&self) -> Vec<usize> {
        self.batches.iter().map(Batch::len).collect()
    }

    /// Order in which prompts are processed relative to the input
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Splits prompts into batches
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    policy: BatchPolicy,
    sort_by_length: bool,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::ZeroBatchSize);
        }
        Ok(Self {
            batch_size,
            policy: BatchPolicy::default(),
            sort_by_length: false,
        })
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process prompts shortest first so batches need less padding
    pub fn with_sort_by_length(mut self, sort: bool) -> Self {
        self.sort_by_length = sort;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Partition `prompts`
    pub fn plan(&self, prompts: &[Prompt]) -> BatchPlan {
        let permutation = if self.sort_by_length {
            Permutation::sorted_by_key(prompts, |p| p.text().len())
        } else {
            Permutation::identity(prompts.len())
        };

        let ordered: Vec<Prompt> = (0..permutation.len())
            .map(|k| prompts[permutation.source_position(k)].clone())
            .collect();

        let n = ordered.len();
        let groups: Vec<Vec<Prompt>> = match self.policy {
            BatchPolicy::Legacy if n == self.batch_size => {
                ordered.into_iter().map(|p| vec![p]).collect()
            }
            BatchPolicy::Legacy if self.batch_size == 1 => {
                if ordered.is_empty() {
                    Vec::new()
                } else {
                    vec![ordered]
                }
            }
            _ => ordered
                .chunks(self.batch_size)
                .map(<[Prompt]>::to_vec)
                .collect(),
        };

        let batches: Vec<Batch> = groups.into_iter().map(Batch::new).collect();

        tracing::debug!(
            prompts = n,
            batches = batches.len(),
            policy = ?self.policy,
            sorted = self.sort_by_length,
            "Partitioned prompts"
        );

        BatchPlan {
            batches,
            permutation,
        }
    }
}
