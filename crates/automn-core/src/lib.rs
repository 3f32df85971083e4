// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared wire and domain types for the Automn runner control plane.
//!
//! Dynamic JSON payloads (request bodies, return values, log context) are
//! modeled as [`serde_json::Value`] at the boundary and only promoted to
//! typed structs where the wire schema is fixed, per the design notes on
//! dynamic JSON at the boundary.

pub mod identity;
pub mod language;
pub mod local_state;
pub mod marker;
pub mod run;
pub mod script;
pub mod wire;

pub use identity::{Capabilities, Environment, RunnerIdentity, RunnerStatus, Versions};
pub use language::Language;
pub use local_state::{RegistrationStatus, RunnerLocalState, RuntimeExecutables, SecretSource};
pub use marker::{JSON_DEPTH_LIMIT, MARKER_LOG, MARKER_NOTIFY, MARKER_RETURN};
pub use run::{AutomnLogEntry, LogLevel, AutomnNotification, NotifyLevel, RunRequest, RunResult};
pub use script::{EnvVariable, ScriptDescriptor};
pub use wire::{Frame, RegistrationRequest, RegistrationResponse};
