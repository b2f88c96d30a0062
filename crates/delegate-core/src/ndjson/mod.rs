//! NDJSON parser for the subagent stream-json protocol.
//!
//! This module parses newline-delimited JSON from a child's stdout into
//! canonical event types, implementing a tolerant reader pattern.

mod parser;
mod types;

pub use parser::{parse_line, parse_value, unwrap_envelope};
pub use types::*;
