// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runner agent library: registration state machine, shared app state,
//! middleware, and the HTTP surface, assembled by `main.rs` into a server.

pub mod http;
pub mod middleware;
pub mod registration;
pub mod state;
pub mod versioning;

pub use registration::RegistrationManager;
pub use state::AppState;
