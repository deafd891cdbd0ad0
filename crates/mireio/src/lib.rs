//! `mireio`: IO helpers for the miremud front end and shard link.
//!
//! This crate intentionally avoids tokio-util's codecs and implements just
//! what we need:
//! - Telnet IAC stripping (stateful parser plus a pure filter function),
//! - a line-oriented connection wrapper with timeouts and password masking,
//! - length-prefixed frame IO (u32 BE) for the shard link,
//! - the handful of ANSI color codes the front end emits.

pub mod ansi;
pub mod conn;
pub mod frame;
pub mod telnet;
