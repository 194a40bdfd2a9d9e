//! # Model Primitives
//!
//! Compiled-in defaults and limits for the transaction-path model.
//!
//! Every tunable here is only a default: the values actually used by a graph
//! come from the [`ModelConfig`](crate::config::ModelConfig) it was built with.

/// Precision used when checking that outbound probabilities sum to one.
pub const PROBABILITY_EPSILON: f64 = 0.000_01;

/// Lifetime hits a vertex needs before its abort forecast is trusted.
///
/// Below this a vertex is always assumed able to abort.
pub const MIN_HITS_FOR_NO_ABORT: u64 = 5;

/// Abort probability at or below which a transaction may skip undo logging.
pub const ABORT_CONFIDENCE_THRESHOLD: f64 = 0.0;

/// Whether past partitions take part in vertex identity.
pub const USE_PAST_PARTITIONS: bool = true;

/// Share of vertices that must report drift before a graph-wide recompute
/// is recommended.
pub const STALE_VERTEX_PROPORTION: f64 = 0.5;

/// Magic bytes for the snapshot binary format header.
///
/// - File Header = Magic Bytes ("TXNP") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"TXNP";

/// Current snapshot serialization format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of queries accepted in a single transaction trace.
///
/// Longer traces are rejected before any graph mutation.
pub const MAX_TRACE_QUERIES: usize = 10_000;
