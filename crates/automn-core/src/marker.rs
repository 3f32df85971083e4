// SPDX-License-Identifier: MIT OR Apache-2.0
//! The three in-band stdout markers and the depth bound injected into every
//! script harness. Kept as plain constants (not an enum) since the wire
//! format is a string prefix, not a tagged value.

pub const MARKER_RETURN: &str = "__SCRIPTRETURN__";
pub const MARKER_LOG: &str = "__SCRIPTLOG__";
pub const MARKER_NOTIFY: &str = "__SCRIPTNOTIFY__";

/// Maximum nesting depth accepted when parsing marker payloads and when the
/// harness helpers serialize values, shared between `automn-parser` and
/// `automn-harness`.
pub const JSON_DEPTH_LIMIT: u32 = 32;

/// Hard cap on the number of `__SCRIPTNOTIFY__` entries kept per run.
pub const MAX_NOTIFICATIONS: usize = 50;

/// Audience field truncation length.
pub const AUDIENCE_MAX_LEN: usize = 256;

/// Notification message truncation length.
pub const NOTIFICATION_MESSAGE_MAX_LEN: usize = 2000;
