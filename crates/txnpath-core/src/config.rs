//! # Model Configuration
//!
//! Tunables a graph is constructed with. Nothing in the model reads a
//! process-wide setting; every graph carries its own `ModelConfig`.

use crate::primitives;
use serde::{Deserialize, Serialize};

/// Which finished transactions contribute timing samples at recompute.
///
/// A vertex records one remaining-time sample per transaction that passed
/// through it. At recompute the samples are matched against the end markers
/// of finished transactions; samples of transactions that do not match are
/// dropped. Whether aborted transactions count as a match is not settled, so
/// it is a policy choice rather than fixed behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeNormalization {
    /// Only samples of committed transactions are kept.
    #[default]
    CommittedOnly,
    /// Samples of committed and aborted transactions are kept.
    CommittedAndAborted,
}

impl TimeNormalization {
    /// True when aborted transactions' samples survive normalization.
    #[must_use]
    pub const fn includes_aborted(self) -> bool {
        matches!(self, Self::CommittedAndAborted)
    }
}

/// Construction-time settings of a [`MarkovGraph`](crate::graph::MarkovGraph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Tolerance when checking that outbound probabilities sum to one.
    pub probability_epsilon: f64,
    /// Abort probability at or below which `predict_no_abort` answers true.
    pub abort_confidence_threshold: f64,
    /// Lifetime hits required before a no-abort prediction is made.
    pub min_hits_for_no_abort: u64,
    /// Whether `past_partitions` take part in vertex identity.
    pub use_past_partitions: bool,
    /// Share of stale vertices that triggers a recompute recommendation.
    pub stale_vertex_proportion: f64,
    /// Timing sample policy applied at recompute.
    pub time_normalization: TimeNormalization,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            probability_epsilon: primitives::PROBABILITY_EPSILON,
            abort_confidence_threshold: primitives::ABORT_CONFIDENCE_THRESHOLD,
            min_hits_for_no_abort: primitives::MIN_HITS_FOR_NO_ABORT,
            use_past_partitions: primitives::USE_PAST_PARTITIONS,
            stale_vertex_proportion: primitives::STALE_VERTEX_PROPORTION,
            time_normalization: TimeNormalization::default(),
        }
    }
}
