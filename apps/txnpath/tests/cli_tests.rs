//! # CLI Tests
//!
//! Drive the commands end to end against files in a temp directory.

use clap::Parser;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use txnpath::cli::{Cli, execute, read_snapshot};
use txnpath_core::{TxnPathError, VertexKind};

const CATALOG: &str = r#"{
  "procedures": [
    {
      "id": 1,
      "name": "neworder",
      "statements": [
        {"id": 1, "name": "getWarehouse"},
        {"id": 2, "name": "insertOrder"}
      ]
    },
    {
      "id": 2,
      "name": "payment",
      "statements": [{"id": 5, "name": "getCustomer"}]
    }
  ]
}"#;

fn query(statement: u32, at: u64, partition: u32) -> serde_json::Value {
    serde_json::json!({
        "statement": statement,
        "start_timestamp": at,
        "stop_timestamp": at + 5,
        "partitions": [partition],
    })
}

fn txn(id: u64, procedure: u32, aborted: bool, queries: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "txn_id": id,
        "procedure": procedure,
        "start_timestamp": 0,
        "stop_timestamp": 100,
        "aborted": aborted,
        "base_partition": 0,
        "queries": queries,
    })
}

fn workload() -> serde_json::Value {
    let mut traces = Vec::new();
    for id in 0..10u64 {
        traces.push(txn(
            id,
            1,
            id % 5 == 0,
            vec![query(1, 10, 0), query(2, 20, (id % 2) as u32)],
        ));
    }
    traces.push(txn(10, 2, false, vec![query(5, 10, 1)]));
    serde_json::Value::Array(traces)
}

struct Fixture {
    dir: TempDir,
    catalog: PathBuf,
    workload: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let catalog = dir.path().join("catalog.json");
    let workload_path = dir.path().join("traces.json");
    std::fs::write(&catalog, CATALOG).expect("write catalog");
    std::fs::write(
        &workload_path,
        serde_json::to_vec(&workload()).expect("encode workload"),
    )
    .expect("write workload");
    Fixture {
        dir,
        catalog,
        workload: workload_path,
    }
}

fn run(args: &[&str]) -> Result<(), TxnPathError> {
    let mut argv = vec!["txnpath", "--quiet"];
    argv.extend_from_slice(args);
    execute(Cli::try_parse_from(argv).expect("valid arguments"))
}

fn path(p: &Path) -> &str {
    p.to_str().expect("utf-8 path")
}

#[test]
fn build_writes_one_snapshot_per_procedure() {
    let f = fixture();
    let out = f.dir.path().join("models");

    run(&[
        "build",
        "-c",
        path(&f.catalog),
        "-w",
        path(&f.workload),
        "-o",
        path(&out),
        "--validate",
    ])
    .expect("build");

    let neworder = std::fs::read(out.join("neworder-1.json")).expect("neworder snapshot");
    let snapshot = read_snapshot(&neworder).expect("decode");
    assert_eq!(snapshot.procedure_name, "neworder");
    assert_eq!(snapshot.transaction_count, 10);
    assert_eq!(snapshot.recompute_count, 1);

    let start = snapshot
        .vertices
        .iter()
        .find(|v| v.kind == VertexKind::Start)
        .expect("start vertex");
    assert!((start.probabilities.abort - 0.2).abs() < 1e-9);
    // Odd transactions touch partitions {0, 1}
    assert!((start.probabilities.single_partition - 0.5).abs() < 1e-9);

    assert!(out.join("payment-2.json").exists());
}

#[test]
fn binary_snapshots_round_trip_through_inspect() {
    let f = fixture();
    let out = f.dir.path().join("bin");

    run(&[
        "build",
        "-c",
        path(&f.catalog),
        "-w",
        path(&f.workload),
        "-o",
        path(&out),
        "-t",
        "binary",
    ])
    .expect("build");

    let file = out.join("payment-2.txnp");
    let snapshot = read_snapshot(&std::fs::read(&file).expect("read")).expect("decode");
    assert_eq!(snapshot.transaction_count, 1);
    assert_eq!(snapshot.query_vertex_count(), 1);

    run(&["inspect", "-i", path(&file)]).expect("inspect binary");
    run(&["--json-mode", "inspect", "-i", path(&out.join("neworder-1.txnp"))])
        .expect("inspect json mode");
}

#[test]
fn validate_accepts_learned_workload() {
    let f = fixture();
    run(&["validate", "-c", path(&f.catalog), "-w", path(&f.workload)]).expect("validate");
}

#[test]
fn unknown_format_is_rejected() {
    let f = fixture();
    let err = run(&[
        "build",
        "-c",
        path(&f.catalog),
        "-w",
        path(&f.workload),
        "-o",
        path(f.dir.path()),
        "-t",
        "xml",
    ])
    .expect_err("unknown format");
    assert!(matches!(err, TxnPathError::SerializationError(_)));
}

#[test]
fn oversized_workload_is_rejected() {
    let f = fixture();
    let config = f.dir.path().join("driver.toml");
    std::fs::write(&config, "max_file_bytes = 16").expect("write config");

    let err = run(&[
        "--config",
        path(&config),
        "validate",
        "-c",
        path(&f.catalog),
        "-w",
        path(&f.workload),
    ])
    .expect_err("file too large");
    assert!(err.to_string().contains("exceeds maximum"));
}

#[test]
fn missing_catalog_is_an_io_error() {
    let f = fixture();
    let err = run(&[
        "validate",
        "-c",
        path(&f.dir.path().join("nope.json")),
        "-w",
        path(&f.workload),
    ])
    .expect_err("missing catalog");
    assert!(matches!(err, TxnPathError::IoError(_)));
}
