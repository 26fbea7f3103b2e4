//! Processing parsed patches into display-ready groups.
//!
//! This module clusters each hunk's lines into alternating context and change
//! groups, runs the word differ once per change group, and turns the word
//! diff into per-line highlight regions that map directly onto Neovim
//! extmarks.
//!
//! ## Processing Flow
//!
//! 1. [`process_patch`] hands every file to [`process_file`], on the rayon pool
//!    when [`Options::parallel`] is set (output order is always source order)
//! 2. [`process_file`] counts additions/deletions, derives the display path and
//!    groups every hunk with [`group_changes_with`]
//! 3. Change groups carry their word diff, computed eagerly at construction
//! 4. [`line_highlights`] projects a change group's word diff onto the lines
//!    of one side when the group is handed to Lua
//!
//! ## Highlight Strategy
//!
//! - Full-line highlight: used when a side has no unchanged text at all (pure
//!   insertions and deletions), or when the changes cover every non-whitespace
//!   character of a line
//! - Partial highlight: byte-column ranges of the changed tokens
//! - Merged regions: adjacent regions separated only by whitespace are merged

use crate::options::Options;
use crate::patch::{self, Action, ChangeKind, HunkChange, ParsedPatch, PatchFile};
use crate::word_diff::{Segments, SegmentKind, WordDiffSegment, compute_word_diff_with};
use log::{debug, trace};
use mlua::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use smallvec::SmallVec;

/// Most lines have 0-2 highlight regions; inline storage avoids heap allocation.
type Highlights = SmallVec<[HighlightRegion; 2]>;

/// A display clustering of consecutive hunk lines.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeGroup {
    /// A maximal run of unchanged lines.
    Context { context: Vec<String> },

    /// A run of removed lines followed by a run of added lines. Either side
    /// may be empty.
    Change {
        removed: Vec<String>,
        added: Vec<String>,
        #[serde(rename = "wordDiff")]
        word_diff: Segments,
    },
}

impl ChangeGroup {
    fn change(removed: Vec<String>, added: Vec<String>, options: &Options) -> Self {
        let word_diff = compute_word_diff_with(&removed.join("\n"), &added.join("\n"), options);
        ChangeGroup::Change {
            removed,
            added,
            word_diff,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, ChangeGroup::Context { .. })
    }
}

/// Splits off the leading run of `kind` changes, returning their contents and
/// the remainder.
fn take_run(changes: &[HunkChange], kind: ChangeKind) -> (Vec<String>, &[HunkChange]) {
    let len = changes.iter().take_while(|c| c.kind == kind).count();
    let (run, rest) = changes.split_at(len);
    (run.iter().map(|c| c.content.clone()).collect(), rest)
}

/// Groups a hunk's changes with default options.
pub fn group_changes(changes: &[HunkChange]) -> Vec<ChangeGroup> {
    group_changes_with(changes, &Options::default())
}

/// Groups a hunk's changes into context and change groups.
///
/// The grouping is a lossless partition: reading the groups back in order
/// yields the input sequence.
pub fn group_changes_with(changes: &[HunkChange], options: &Options) -> Vec<ChangeGroup> {
    let mut groups = Vec::new();
    let mut rest = changes;

    while let Some(first) = rest.first() {
        if first.kind == ChangeKind::Context {
            let (context, tail) = take_run(rest, ChangeKind::Context);
            groups.push(ChangeGroup::Context { context });
            rest = tail;
        } else {
            let (removed, tail) = take_run(rest, ChangeKind::Removed);
            let (added, tail) = take_run(tail, ChangeKind::Added);
            groups.push(ChangeGroup::change(removed, added, options));
            rest = tail;
        }
    }

    groups
}

/// A hunk whose changes have been grouped for display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DisplayHunk {
    pub header: String,
    pub groups: Vec<ChangeGroup>,
}

/// A processed file ready for display.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayFile {
    pub path: String,

    /// `path` without a leading `a/` or `b/` when prefix stripping is enabled.
    pub display_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,

    pub action: Action,

    /// Count of added lines (for display in file list).
    pub additions: u32,

    /// Count of removed lines (for display in file list).
    pub deletions: u32,

    pub hunks: Vec<DisplayHunk>,
}

fn count_changes(file: &PatchFile) -> (u32, u32) {
    file.hunks
        .iter()
        .flat_map(|h| &h.changes)
        .fold((0, 0), |(additions, deletions), change| match change.kind {
            ChangeKind::Added => (additions + 1, deletions),
            ChangeKind::Removed => (additions, deletions + 1),
            ChangeKind::Context => (additions, deletions),
        })
}

/// Groups every hunk of a file and collects its statistics.
#[must_use]
pub fn process_file(file: PatchFile, options: &Options) -> DisplayFile {
    let (additions, deletions) = count_changes(&file);
    let display_path = if options.strip_prefixes {
        patch::display_path(&file.path).to_string()
    } else {
        file.path.clone()
    };

    let hunks: Vec<DisplayHunk> = file
        .hunks
        .into_iter()
        .map(|hunk| DisplayHunk {
            groups: group_changes_with(&hunk.changes, options),
            header: hunk.header,
        })
        .collect();
    trace!(
        "{}: {} hunks, {} change groups",
        file.path,
        hunks.len(),
        hunks
            .iter()
            .flat_map(|h| &h.groups)
            .filter(|g| !g.is_context())
            .count()
    );

    DisplayFile {
        path: file.path,
        display_path,
        new_path: file.new_path,
        action: file.action,
        additions,
        deletions,
        hunks,
    }
}

/// Processes every file of a parsed patch, preserving source order.
#[must_use]
pub fn process_patch(patch: ParsedPatch, options: &Options) -> Vec<DisplayFile> {
    debug!(
        "processing {} files (parallel: {})",
        patch.files.len(),
        options.parallel
    );
    if options.parallel {
        patch
            .files
            .into_par_iter()
            .map(|file| process_file(file, options))
            .collect()
    } else {
        patch
            .files
            .into_iter()
            .map(|file| process_file(file, options))
            .collect()
    }
}

/// Which text of a change group to project highlights onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The removed lines.
    Old,
    /// The added lines.
    New,
}

impl Side {
    #[inline]
    fn includes(self, segment: &WordDiffSegment) -> bool {
        match self {
            Side::Old => segment.on_old_side(),
            Side::New => segment.on_new_side(),
        }
    }
}

/// A highlight region within a line, specified by byte column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightRegion {
    /// Start column (0-indexed, inclusive).
    pub start: u32,

    /// End column (exclusive), or -1 to indicate full-line highlight.
    pub end: i32,
}

impl HighlightRegion {
    #[inline]
    #[must_use]
    pub fn full_line() -> Self {
        Self { start: 0, end: -1 }
    }

    #[inline]
    #[must_use]
    pub fn columns(start: u32, end: u32) -> Self {
        Self {
            start,
            end: i32::try_from(end).unwrap_or(i32::MAX),
        }
    }
}

/// A highlight region on one line of a change group side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHighlight {
    /// 0-indexed line within the group's `removed` or `added` lines.
    pub line: u32,
    pub region: HighlightRegion,
}

/// Projects a change group's word diff onto the lines of one side.
///
/// Context groups have no highlights.
pub fn line_highlights(group: &ChangeGroup, side: Side) -> Vec<LineHighlight> {
    let ChangeGroup::Change {
        removed,
        added,
        word_diff,
    } = group
    else {
        return Vec::new();
    };
    let lines = match side {
        Side::Old => removed,
        Side::New => added,
    };

    let fully_changed = word_diff
        .iter()
        .filter(|s| side.includes(s))
        .all(|s| s.kind != SegmentKind::Unchanged);
    if fully_changed {
        return (0..lines.len() as u32)
            .map(|line| LineHighlight {
                line,
                region: HighlightRegion::full_line(),
            })
            .collect();
    }

    // Changed byte ranges per line, in column order.
    let mut per_line: Vec<SmallVec<[(u32, u32); 4]>> = vec![SmallVec::new(); lines.len()];
    let mut line = 0usize;
    let mut col = 0u32;
    for segment in word_diff.iter().filter(|s| side.includes(s)) {
        let changed = segment.kind != SegmentKind::Unchanged;
        for (i, piece) in segment.value.split('\n').enumerate() {
            if i > 0 {
                line += 1;
                col = 0;
            }
            let end = col + piece.len() as u32;
            if changed && !piece.is_empty() {
                if let Some(regions) = per_line.get_mut(line) {
                    regions.push((col, end));
                }
            }
            col = end;
        }
    }

    per_line
        .iter()
        .zip(lines)
        .enumerate()
        .flat_map(|(idx, (regions, content))| {
            compute_highlights(content, regions)
                .into_iter()
                .map(move |region| LineHighlight {
                    line: idx as u32,
                    region,
                })
        })
        .collect()
}

/// Computes highlight regions for a line from its changed byte ranges.
///
/// - No changes → empty (no highlighting)
/// - Single range spanning the line → full-line highlight
/// - Adjacent ranges separated by whitespace → merged
/// - All non-whitespace covered → full-line highlight
fn compute_highlights(content: &str, regions: &[(u32, u32)]) -> Highlights {
    if regions.is_empty() {
        return Highlights::new();
    }

    let len = content.len() as u32;
    if regions.len() == 1 && regions[0].0 == 0 && regions[0].1 >= len {
        return smallvec::smallvec![HighlightRegion::full_line()];
    }

    let merged = merge_regions(regions, content.as_bytes());
    if covers_all_non_whitespace(content, &merged) {
        return smallvec::smallvec![HighlightRegion::full_line()];
    }

    merged
        .into_iter()
        .map(|(start, end)| HighlightRegion::columns(start, end))
        .collect()
}

/// Merges sorted change ranges, bridging gaps that contain only whitespace.
fn merge_regions(regions: &[(u32, u32)], bytes: &[u8]) -> SmallVec<[(u32, u32); 4]> {
    let mut merged: SmallVec<[(u32, u32); 4]> = SmallVec::with_capacity(regions.len());

    for &(start, end) in regions {
        if let Some((_, last_end)) = merged.last_mut() {
            let gap_start = *last_end as usize;
            let gap_end = start as usize;

            if gap_start >= gap_end || is_whitespace_only(bytes, gap_start, gap_end) {
                *last_end = (*last_end).max(end);
                continue;
            }
        }
        merged.push((start, end));
    }

    merged
}

#[inline]
fn is_whitespace_only(bytes: &[u8], start: usize, end: usize) -> bool {
    bytes
        .get(start..end)
        .is_some_and(|slice| slice.iter().all(u8::is_ascii_whitespace))
}

/// Checks if the regions cover every non-whitespace character of the line.
fn covers_all_non_whitespace(line: &str, regions: &[(u32, u32)]) -> bool {
    let mut has_non_ws = false;

    for (i, c) in line.char_indices() {
        if !c.is_whitespace() {
            has_non_ws = true;
            let pos = i as u32;
            if !regions
                .iter()
                .any(|(start, end)| pos >= *start && pos < *end)
            {
                return false;
            }
        }
    }

    has_non_ws
}

impl IntoLua for LineHighlight {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("line", self.line)?;
        table.set("start", self.region.start)?;
        table.set("end", self.region.end)?;
        Ok(LuaValue::Table(table))
    }
}

impl IntoLua for ChangeGroup {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        let old_highlights = line_highlights(&self, Side::Old);
        let new_highlights = line_highlights(&self, Side::New);

        match self {
            ChangeGroup::Context { context } => {
                table.set("type", "context")?;
                table.set("context", lua.create_sequence_from(context)?)?;
            }
            ChangeGroup::Change {
                removed,
                added,
                word_diff,
            } => {
                table.set("type", "change")?;
                table.set("removed", lua.create_sequence_from(removed)?)?;
                table.set("added", lua.create_sequence_from(added)?)?;
                table.set("word_diff", lua.create_sequence_from(word_diff)?)?;
                table.set(
                    "removed_highlights",
                    lua.create_sequence_from(old_highlights)?,
                )?;
                table.set("added_highlights", lua.create_sequence_from(new_highlights)?)?;
            }
        }

        Ok(LuaValue::Table(table))
    }
}

impl IntoLua for DisplayHunk {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("header", self.header)?;
        table.set("groups", lua.create_sequence_from(self.groups)?)?;
        Ok(LuaValue::Table(table))
    }
}

impl IntoLua for DisplayFile {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("path", self.path)?;
        table.set("display_path", self.display_path)?;
        table.set("new_path", self.new_path)?;
        table.set("action", self.action.as_str())?;
        table.set("additions", self.additions)?;
        table.set("deletions", self.deletions)?;
        table.set("hunks", lua.create_sequence_from(self.hunks)?)?;
        Ok(LuaValue::Table(table))
    }
}
