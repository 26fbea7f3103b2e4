//! # patchview-nvim
//!
//! A Neovim plugin core for reviewing `apply_patch` documents produced by
//! coding agents.
//!
//! This crate provides Lua bindings that parse the `*** Begin Patch` format
//! and process it into a display-ready form: per-file hunks grouped into
//! context and change runs, with a word-level diff and per-line highlight
//! regions for every change run.
//!
//! ## Architecture
//!
//! The crate is organized into these modules:
//!
//! - `patch` - Types and the lenient parser for the patch format
//! - `word_diff` - Token-level diffing of a change group's old and new text
//! - `processor` - Change grouping, file statistics and highlight regions
//! - `options` - Options accepted from Lua
//! - `error` - Errors raised at the Lua boundary
//! - `lib` (this module) - Lua bindings
//!
//! ## Usage from Lua
//!
//! ```lua
//! local patchview = require("patchview_nvim")
//!
//! -- Parsed structure only
//! local parsed = patchview.parse_patch(text)
//!
//! -- Grouped hunks with word diffs and highlight regions
//! local result = patchview.process_patch(text, { parallel = false })
//! for _, file in ipairs(result.files) do
//!   print(file.display_path, file.additions, file.deletions)
//! end
//!
//! -- One document per `*** Begin Patch` block
//! for _, block in ipairs(patchview.split_patches(text)) do
//!   patchview.process_patch(block)
//! end
//! ```
//!
//! ## Environment Variables
//!
//! - `PATCHVIEW_LOG` - `env_logger` filter for diagnostics on stderr
//!   (default `warn`), e.g. `PATCHVIEW_LOG=patchview_nvim=debug`

use mlua::prelude::*;

mod error;
mod options;
mod patch;
mod processor;
mod word_diff;

use error::Error;
use options::Options;
use patch::HunkChange;

const LOG_ENV: &str = "PATCHVIEW_LOG";

/// Initializes stderr logging. Subsequent calls are no-ops.
fn init_logging() {
    let env = env_logger::Env::default().filter_or(LOG_ENV, "warn");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

/// Serializes a parsed patch with the field names of the web viewer.
fn patch_json(text: &str) -> Result<String, Error> {
    Ok(serde_json::to_string(&patch::parse_patch(text))?)
}

/// Parses a patch document.
fn parse_patch(lua: &Lua, text: String) -> LuaResult<LuaValue> {
    patch::parse_patch(&text).into_lua(lua)
}

/// Groups a list of `{type, content}` changes.
fn group_changes(
    lua: &Lua,
    (changes, options): (Vec<HunkChange>, Option<Options>),
) -> LuaResult<LuaTable> {
    let groups = match options {
        Some(options) => processor::group_changes_with(&changes, &options),
        None => processor::group_changes(&changes),
    };
    lua.create_sequence_from(groups)
}

/// Computes the word diff between two text blocks.
fn diff_words(
    lua: &Lua,
    (old, new, options): (String, String, Option<Options>),
) -> LuaResult<LuaTable> {
    let segments = match options {
        Some(options) => word_diff::compute_word_diff_with(&old, &new, &options),
        None => word_diff::compute_word_diff(&old, &new),
    };
    lua.create_sequence_from(segments)
}

/// Parses and processes a patch document into display files.
fn process_patch(lua: &Lua, (text, options): (String, Option<Options>)) -> LuaResult<LuaTable> {
    let options = options.unwrap_or_default();
    let files = processor::process_patch(patch::parse_patch(&text), &options);

    let result = lua.create_table()?;
    result.set("files", lua.create_sequence_from(files)?)?;
    Ok(result)
}

/// Creates the Lua module exports. Called by mlua when loaded via `require("patchview_nvim")`.
#[cfg_attr(feature = "module", mlua::lua_module)]
fn patchview_nvim(lua: &Lua) -> LuaResult<LuaTable> {
    init_logging();

    let exports = lua.create_table()?;
    exports.set("parse_patch", lua.create_function(parse_patch)?)?;
    exports.set("group_changes", lua.create_function(group_changes)?)?;
    exports.set("word_diff", lua.create_function(diff_words)?)?;
    exports.set("process_patch", lua.create_function(process_patch)?)?;
    exports.set(
        "split_patches",
        lua.create_function(|_, text: String| Ok(patch::split_patches(&text)))?,
    )?;
    exports.set(
        "display_path",
        lua.create_function(|_, path: String| Ok(patch::display_path(&path).to_string()))?,
    )?;
    exports.set(
        "parse_patch_json",
        lua.create_function(|_, text: String| Ok(patch_json(&text)?))?,
    )?;
    Ok(exports)
}
