//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::DriverConfig;
use crate::workload::{BuildOutcome, build_models, load_catalog, load_traces, read_bounded};
use std::path::{Path, PathBuf};
use txnpath_core::{
    GraphSnapshot, PartitionSet, SnapshotVertex, TxnPathError, VertexKind,
    primitives::MAGIC_BYTES, snapshot_from_bytes, snapshot_to_bytes,
};

/// How results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json_mode: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// On-disk snapshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Binary,
}

impl SnapshotFormat {
    pub fn parse(format: &str) -> Result<Self, TxnPathError> {
        match format {
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(TxnPathError::SerializationError(format!(
                "Unknown format: {}",
                other
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "txnp",
        }
    }

    fn encode(self, snapshot: &GraphSnapshot) -> Result<Vec<u8>, TxnPathError> {
        match self {
            Self::Json => serde_json::to_vec_pretty(snapshot)
                .map_err(|e| TxnPathError::SerializationError(e.to_string())),
            Self::Binary => snapshot_to_bytes(snapshot),
        }
    }
}

// =============================================================================
// PATH HELPERS
// =============================================================================

/// Create `dir` if needed and return it canonicalized.
fn validate_output_dir(dir: &Path) -> Result<PathBuf, TxnPathError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        TxnPathError::IoError(format!(
            "Cannot create output directory '{}': {}",
            dir.display(),
            e
        ))
    })?;

    let canonical = dir.canonicalize().map_err(|e| {
        TxnPathError::IoError(format!(
            "Invalid output directory '{}': {}",
            dir.display(),
            e
        ))
    })?;

    if !canonical.is_dir() {
        return Err(TxnPathError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            dir.display()
        )));
    }
    Ok(canonical)
}

/// File name of a procedure's snapshot. Procedure names come from the
/// catalog, so anything outside `[A-Za-z0-9_-]` is replaced and the id keeps
/// names unique.
pub fn snapshot_file_name(snapshot: &GraphSnapshot, format: SnapshotFormat) -> String {
    let name: String = snapshot
        .procedure_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}-{}.{}",
        name,
        snapshot.procedure.0,
        format.extension()
    )
}

/// Decode a snapshot file, binary when it starts with the magic bytes and
/// JSON otherwise.
pub fn read_snapshot(bytes: &[u8]) -> Result<GraphSnapshot, TxnPathError> {
    if bytes.starts_with(MAGIC_BYTES) {
        snapshot_from_bytes(bytes)
    } else {
        serde_json::from_slice(bytes)
            .map_err(|e| TxnPathError::SerializationError(format!("Invalid snapshot: {}", e)))
    }
}

fn format_partitions(partitions: &PartitionSet) -> String {
    let ids: Vec<String> = partitions.iter().map(|p| p.0.to_string()).collect();
    format!("{{{}}}", ids.join(","))
}

fn load_and_build(
    config: &DriverConfig,
    catalog: &Path,
    workload: &Path,
) -> Result<BuildOutcome, TxnPathError> {
    let catalog = load_catalog(catalog, config.max_file_bytes)?;
    let traces = load_traces(workload, config.max_file_bytes)?;
    tracing::info!(
        procedures = catalog.procedures.len(),
        traces = traces.len(),
        "replaying workload"
    );
    build_models(&catalog, &traces, config)
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Learn every procedure's graph and write its snapshot into `dir`.
pub fn cmd_build(
    config: &DriverConfig,
    output: Output,
    catalog: &Path,
    workload: &Path,
    dir: &Path,
    format: &str,
    validate: bool,
) -> Result<(), TxnPathError> {
    let format = SnapshotFormat::parse(format)?;
    let dir = validate_output_dir(dir)?;
    let outcome = load_and_build(config, catalog, workload)?;

    let mut written = Vec::with_capacity(outcome.models.len());
    for model in outcome.models.values() {
        if validate {
            model.graph.validate()?;
        }
        let snapshot = model.graph.snapshot();
        let path = dir.join(snapshot_file_name(&snapshot, format));
        std::fs::write(&path, format.encode(&snapshot)?).map_err(|e| {
            TxnPathError::IoError(format!("Cannot write '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "wrote snapshot");
        written.push((snapshot, model.learned, model.rejected, path));
    }

    if output.json_mode {
        let models: Vec<_> = written
            .iter()
            .map(|(snapshot, learned, rejected, path)| {
                serde_json::json!({
                    "procedure": snapshot.procedure_name,
                    "learned": learned,
                    "rejected": rejected,
                    "vertices": snapshot.vertices.len(),
                    "edges": snapshot.edges.len(),
                    "path": path.to_string_lossy(),
                })
            })
            .collect();
        let summary = serde_json::json!({
            "learned": outcome.learned(),
            "rejected": outcome.rejected(),
            "orphaned": outcome.orphaned,
            "models": models,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
        return Ok(());
    }

    if output.quiet {
        return Ok(());
    }

    for (snapshot, learned, rejected, path) in &written {
        println!(
            "{:<24} learned {:>8}  rejected {:>6}  vertices {:>6}  edges {:>6}  -> {}",
            snapshot.procedure_name,
            learned,
            rejected,
            snapshot.vertices.len(),
            snapshot.edges.len(),
            path.display()
        );
    }
    println!();
    println!(
        "Learned {} traces ({} rejected, {} for unknown procedures)",
        outcome.learned(),
        outcome.rejected(),
        outcome.orphaned
    );
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// Print a summary of one snapshot file.
pub fn cmd_inspect(config: &DriverConfig, output: Output, input: &Path) -> Result<(), TxnPathError> {
    let bytes = read_bounded(input, config.max_file_bytes)?;
    let snapshot = read_snapshot(&bytes)?;
    let start = snapshot.vertices.iter().find(|v| v.kind == VertexKind::Start);

    if output.json_mode {
        let summary = serde_json::json!({
            "procedure": snapshot.procedure_name,
            "transactions": snapshot.transaction_count,
            "recomputes": snapshot.recompute_count,
            "vertices": snapshot.vertices.len(),
            "query_vertices": snapshot.query_vertex_count(),
            "edges": snapshot.edges.len(),
            "partitions": snapshot.partitions().iter().map(|p| p.0).collect::<Vec<_>>(),
            "start": start.map(|v| &v.probabilities),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Procedure {} ({:?})", snapshot.procedure_name, snapshot.procedure);
    println!("==================");
    println!("Transactions:   {}", snapshot.transaction_count);
    println!("Recomputes:     {}", snapshot.recompute_count);
    println!(
        "Vertices:       {} ({} query)",
        snapshot.vertices.len(),
        snapshot.query_vertex_count()
    );
    println!("Edges:          {}", snapshot.edges.len());
    println!("Partitions:     {}", format_partitions(&snapshot.partitions()));

    if let Some(start) = start {
        println!();
        println!("From start:");
        println!("  Abort:            {:.4}", start.probabilities.abort);
        println!("  Single partition: {:.4}", start.probabilities.single_partition);
        println!("  No new partition: {:.4}", start.probabilities.no_new_partitions);
    }

    if output.verbose {
        println!();
        for vertex in &snapshot.vertices {
            println!("{}", vertex_line(vertex));
        }
    }
    Ok(())
}

fn vertex_line(vertex: &SnapshotVertex) -> String {
    let statement = vertex
        .statement
        .map(|s| format!("stmt {}#{}", s.0, vertex.instance_index))
        .unwrap_or_default();
    let remaining = vertex
        .average_remaining_time
        .map(|t| format!("{:.1}", t))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "  v{:<5} {:<6} {:<14} parts {:<10} past {:<10} hits {:>8}  abort {:.3}  single {:.3}  remaining {}",
        vertex.id.0,
        vertex.kind.to_string(),
        statement,
        format_partitions(&vertex.partitions),
        format_partitions(&vertex.past_partitions),
        vertex.total_hits,
        vertex.probabilities.abort,
        vertex.probabilities.single_partition,
        remaining
    )
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Learn every procedure's graph and audit it. Fails with the first
/// violation found after reporting all of them.
pub fn cmd_validate(
    config: &DriverConfig,
    output: Output,
    catalog: &Path,
    workload: &Path,
) -> Result<(), TxnPathError> {
    let outcome = load_and_build(config, catalog, workload)?;

    let results: Vec<_> = outcome
        .models
        .values()
        .map(|model| (model.graph.procedure().name.clone(), model.graph.validate()))
        .collect();

    if output.json_mode {
        let report: Vec<_> = results
            .iter()
            .map(|(name, result)| {
                serde_json::json!({
                    "procedure": name,
                    "valid": result.is_ok(),
                    "error": result.as_ref().err().map(|e| e.to_string()),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else if !output.quiet {
        for (name, result) in &results {
            match result {
                Ok(()) => println!("{:<24} ok", name),
                Err(e) => println!("{:<24} INVALID: {}", name, e),
            }
        }
    }

    match results.into_iter().find_map(|(_, result)| result.err()) {
        Some(violation) => Err(violation.into()),
        None => Ok(()),
    }
}
