// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution engine: orchestrates a single script run through the harness,
//! interpreter launcher, stream decoder and output parser.

pub mod engine;
pub mod package_manager;

pub use engine::{ExecutionEngine, LogStream, OnLog};
pub use package_manager::{
    DependencyInstallError, FilesystemPackageManager, NoopPackageManager, PackageCacheSummary,
    PackageManager, PackageStatus,
};
