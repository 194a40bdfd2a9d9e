//! # txnpath
//!
//! Batch driver for the transaction-path model: replays recorded workloads
//! into per-procedure graphs and writes their snapshots.

pub mod cli;
pub mod config;
pub mod workload;
