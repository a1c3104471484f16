//! Ingest Verifier Library
//!
//! Verifies that an eventually-consistent, deduplicating store absorbs a synthetic record stream
//! correctly: a deterministic generator feeds a paced insertion driver, a drain detector gates
//! validation, and a replay oracle checks uniqueness and latest-value correctness of the
//! materialized output.
//!
//! Binaries and integration tests build on the modules exported here.

pub mod columnar;
pub mod config;
pub mod dataset;
pub mod drain;
pub mod driver;
pub mod encode;
pub mod error;
pub mod local_warehouse;
pub mod oracle;
pub mod tables;

pub use config::RunConfig;
pub use dataset::{Dataset, DatasetParams, KeyFormat, RandomDataset};
pub use drain::{wait_for_drain, DrainConfig, QueueDepthProbe};
pub use driver::{run_insertion, DriverConfig, InsertionApi};
pub use error::{Result, VerifyError};
pub use oracle::{validate, validate_in_background, ValidationReport};
pub use tables::{TableDef, TableRegistry};
