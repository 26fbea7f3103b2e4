//! Errors raised at the Lua boundary.
//!
//! Parsing, grouping and word diffing never fail; only the values Lua hands us
//! (option tables, change lists) and JSON encoding can.

use mlua::prelude::LuaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '{key}' must be {expected}")]
    InvalidOption { key: String, expected: &'static str },

    #[error("invalid change type '{0}', expected 'context', 'removed' or 'added'")]
    InvalidChangeType(String),

    #[error("failed to encode patch as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for LuaError {
    fn from(err: Error) -> Self {
        LuaError::external(err)
    }
}
