// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interpreter resolution and process spawning with guaranteed subtree
//! teardown.

mod resolve;
mod spawn;

pub use resolve::{launch_args, InterpreterResolver};
pub use spawn::{spawn_grouped, GroupedChild};
