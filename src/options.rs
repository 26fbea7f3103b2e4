//! Options accepted by the Lua exports.
//!
//! Every export that takes options accepts `nil` (all defaults) or a table
//! with any subset of the keys below:
//!
//! ```lua
//! require("patchview_nvim").process_patch(text, {
//!   parallel = true,              -- group files on the rayon pool
//!   strip_prefixes = true,        -- derive display paths without a/ b/
//!   word_diff = true,             -- token-level diff inside change groups
//!   max_word_diff_tokens = 10000, -- fall back to whole-block diff above this
//! })
//! ```

use crate::error::Error;
use mlua::prelude::*;

/// Above this many tokens (old + new) a change group gets a coarse diff.
pub const DEFAULT_MAX_WORD_DIFF_TOKENS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub parallel: bool,
    pub strip_prefixes: bool,
    pub word_diff: bool,
    pub max_word_diff_tokens: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            parallel: true,
            strip_prefixes: true,
            word_diff: true,
            max_word_diff_tokens: DEFAULT_MAX_WORD_DIFF_TOKENS,
        }
    }
}

impl Options {
    /// Applies a single `key = value` pair from a Lua options table.
    fn set(&mut self, key: &str, value: LuaValue) -> Result<(), Error> {
        match key {
            "parallel" => self.parallel = expect_bool(key, value)?,
            "strip_prefixes" => self.strip_prefixes = expect_bool(key, value)?,
            "word_diff" => self.word_diff = expect_bool(key, value)?,
            "max_word_diff_tokens" => self.max_word_diff_tokens = expect_count(key, value)?,
            _ => return Err(Error::UnknownOption(key.to_string())),
        }
        Ok(())
    }
}

fn expect_bool(key: &str, value: LuaValue) -> Result<bool, Error> {
    match value {
        LuaValue::Boolean(b) => Ok(b),
        _ => Err(Error::InvalidOption {
            key: key.to_string(),
            expected: "a boolean",
        }),
    }
}

fn expect_count(key: &str, value: LuaValue) -> Result<usize, Error> {
    match value {
        LuaValue::Integer(n) if n >= 0 => Ok(n as usize),
        LuaValue::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(Error::InvalidOption {
            key: key.to_string(),
            expected: "a non-negative integer",
        }),
    }
}

impl FromLua for Options {
    fn from_lua(value: LuaValue, _lua: &Lua) -> LuaResult<Self> {
        let mut options = Options::default();
        match value {
            LuaValue::Nil => {}
            LuaValue::Table(table) => {
                for pair in table.pairs::<String, LuaValue>() {
                    let (key, value) = pair?;
                    options.set(&key, value)?;
                }
            }
            _ => {
                return Err(Error::InvalidOption {
                    key: "options".to_string(),
                    expected: "a table or nil",
                }
                .into());
            }
        }
        Ok(options)
    }
}
