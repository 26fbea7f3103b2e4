//! Types and parsing for `apply_patch` documents.
//!
//! The patch format is the multi-file envelope emitted by coding agents for the
//! `apply_patch` tool. It is not a unified diff: files are introduced by
//! directive lines, and each update carries `@@` hunks whose lines are marked
//! with `-`, `+` or a single space.
//!
//! ## Example
//!
//! ```text
//! *** Begin Patch
//! *** Add File: docs/notes.md
//! +# Notes
//! *** Update File: src/app.py
//! *** Move to: src/main.py
//! @@ def main():
//! -    print("hi")
//! +    print("hello")
//! *** Delete File: old.txt
//! *** End Patch
//! ```
//!
//! [`parse_patch`] is lenient: it never fails, and lines that make no sense
//! where they appear are dropped so that truncated or slightly malformed
//! patches still render whatever can be recovered.

use crate::error::Error;
use log::{debug, trace};
use mlua::prelude::*;
use serde::Serialize;

const BEGIN_PATCH: &str = "*** Begin Patch";
const END_PATCH: &str = "*** End Patch";
const END_OF_FILE: &str = "*** End of File";
const MOVE_TO: &str = "*** Move to: ";

/// File directives and the action each one starts.
const FILE_DIRECTIVES: [(&str, Action); 3] = [
    ("*** Add File: ", Action::Add),
    ("*** Update File: ", Action::Update),
    ("*** Delete File: ", Action::Delete),
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
    /// An update whose file also moves to [`PatchFile::new_path`].
    Move,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Move => "move",
        }
    }
}

/// The parsed document: every file entry in source order.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ParsedPatch {
    pub files: Vec<PatchFile>,
}

/// One file-level edit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatchFile {
    /// Source path exactly as written in the directive (trimmed).
    pub path: String,

    pub action: Action,

    /// Destination of a `*** Move to:` directive. Set iff `action` is [`Action::Move`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,

    /// Empty for pure adds/deletes/moves without content lines.
    pub hunks: Vec<PatchHunk>,
}

impl PatchFile {
    fn new(path: &str, action: Action) -> Self {
        Self {
            path: path.to_string(),
            action,
            new_path: None,
            hunks: Vec::new(),
        }
    }
}

/// A contiguous region of changes within a file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchHunk {
    /// The raw `@@` line, or empty when content started without one.
    pub header: String,
    pub changes: Vec<HunkChange>,
}

impl PatchHunk {
    fn with_header(header: &str) -> Self {
        Self {
            header: header.to_string(),
            changes: Vec::new(),
        }
    }

    fn implicit() -> Self {
        Self::with_header("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Context,
    Removed,
    Added,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Context => "context",
            ChangeKind::Removed => "removed",
            ChangeKind::Added => "added",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context" => Some(ChangeKind::Context),
            "removed" => Some(ChangeKind::Removed),
            "added" => Some(ChangeKind::Added),
            _ => None,
        }
    }
}

/// A single hunk line with its marker character stripped.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HunkChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub content: String,
}

impl HunkChange {
    pub fn context(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Context,
            content: content.into(),
        }
    }

    pub fn removed(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            content: content.into(),
        }
    }

    pub fn added(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Added,
            content: content.into(),
        }
    }

    /// Classifies a content line by its leading marker.
    ///
    /// An empty line is an empty context line; any other marker yields `None`.
    fn from_line(line: &str) -> Option<Self> {
        if let Some(rest) = line.strip_prefix('-') {
            Some(Self::removed(rest))
        } else if let Some(rest) = line.strip_prefix('+') {
            Some(Self::added(rest))
        } else if let Some(rest) = line.strip_prefix(' ') {
            Some(Self::context(rest))
        } else if line.is_empty() {
            Some(Self::context(""))
        } else {
            None
        }
    }
}

/// Matches `*** Add File: `, `*** Update File: ` and `*** Delete File: `.
/// The path must be non-empty before trimming.
fn file_directive(line: &str) -> Option<(Action, &str)> {
    FILE_DIRECTIVES.iter().find_map(|&(prefix, action)| {
        line.strip_prefix(prefix)
            .filter(|path| !path.is_empty())
            .map(|path| (action, path.trim()))
    })
}

fn move_directive(line: &str) -> Option<&str> {
    line.strip_prefix(MOVE_TO)
        .filter(|path| !path.is_empty())
        .map(str::trim)
}

/// The file under construction together with its pending hunk.
struct FileBuilder {
    file: PatchFile,
    hunk: Option<PatchHunk>,
}

impl FileBuilder {
    fn new(path: &str, action: Action) -> Self {
        Self {
            file: PatchFile::new(path, action),
            hunk: None,
        }
    }

    fn flush_hunk(&mut self) {
        if let Some(hunk) = self.hunk.take() {
            self.file.hunks.push(hunk);
        }
    }

    fn start_hunk(&mut self, header: &str) {
        self.flush_hunk();
        self.hunk = Some(PatchHunk::with_header(header));
    }

    fn push_content(&mut self, line: &str) {
        let hunk = self.hunk.get_or_insert_with(PatchHunk::implicit);
        match HunkChange::from_line(line) {
            Some(change) => hunk.changes.push(change),
            None => debug!("dropping unrecognised line in {}: {line:?}", self.file.path),
        }
    }

    fn finish(mut self) -> PatchFile {
        self.flush_hunk();
        self.file
    }
}

/// Accumulator threaded through [`parse_patch`]'s fold over the input lines.
#[derive(Default)]
struct Parser {
    in_patch: bool,
    files: Vec<PatchFile>,
    current: Option<FileBuilder>,
}

impl Parser {
    fn feed(mut self, line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed == BEGIN_PATCH {
            self.in_patch = true;
            return self;
        }
        if trimmed == END_PATCH {
            self.in_patch = false;
            return self;
        }

        if !self.in_patch && self.current.is_none() {
            trace!("skipping line outside patch: {line:?}");
            return self;
        }

        if let Some((action, path)) = file_directive(line) {
            self.finish_file();
            self.current = Some(FileBuilder::new(path, action));
            return self;
        }

        if let Some(new_path) = move_directive(line) {
            match self.current.as_mut() {
                Some(current) => {
                    current.file.action = Action::Move;
                    current.file.new_path = Some(new_path.to_string());
                }
                None => debug!("dropping move directive outside a file: {line:?}"),
            }
            return self;
        }

        if trimmed == END_OF_FILE {
            return self;
        }

        match self.current.as_mut() {
            Some(current) if line.starts_with("@@") => current.start_hunk(line),
            Some(current) => current.push_content(line),
            None => trace!("skipping line before first file directive: {line:?}"),
        }
        self
    }

    fn finish_file(&mut self) {
        if let Some(current) = self.current.take() {
            self.files.push(current.finish());
        }
    }

    fn finish(mut self) -> ParsedPatch {
        self.finish_file();
        ParsedPatch { files: self.files }
    }
}

/// Parses a patch document into its file entries.
///
/// Never fails. Content before the first `*** Begin Patch`, hunk lines before
/// any file directive and lines with an unknown marker are dropped. A missing
/// `*** End Patch` is tolerated: the last file is flushed at end of input.
pub fn parse_patch(text: &str) -> ParsedPatch {
    let patch = text.lines().fold(Parser::default(), Parser::feed).finish();
    debug!(
        "parsed patch: {} files, {} hunks",
        patch.files.len(),
        patch.files.iter().map(|f| f.hunks.len()).sum::<usize>()
    );
    patch
}

/// Splits a document holding several `*** Begin Patch` blocks into one
/// document per block.
///
/// Each block keeps its own begin marker; text before the first marker is
/// dropped and repeated `*** End Patch` lines collapse into one. Documents
/// with at most one begin marker are returned unchanged.
pub fn split_patches(text: &str) -> Vec<String> {
    let is_marker = |line: &str, marker: &str| line.trim_end() == marker;

    let begins = text
        .lines()
        .filter(|line| is_marker(line, BEGIN_PATCH))
        .count();
    if begins <= 1 {
        return vec![text.to_string()];
    }

    let mut patches: Vec<String> = Vec::with_capacity(begins);
    let mut after_end = false;
    for line in text.lines() {
        if is_marker(line, BEGIN_PATCH) {
            patches.push(String::new());
            after_end = false;
        }
        let Some(patch) = patches.last_mut() else {
            continue;
        };

        let is_end = is_marker(line, END_PATCH);
        if is_end && after_end {
            continue;
        }
        after_end = is_end;

        patch.push_str(line);
        patch.push('\n');
    }

    debug!("split document into {} patches", patches.len());
    patches
}

/// Strips a single git-style `a/` or `b/` prefix for display.
pub fn display_path(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

impl IntoLua for HunkChange {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("type", self.kind.as_str())?;
        table.set("content", self.content)?;
        Ok(LuaValue::Table(table))
    }
}

impl FromLua for HunkChange {
    fn from_lua(value: LuaValue, lua: &Lua) -> LuaResult<Self> {
        let table = LuaTable::from_lua(value, lua)?;
        let kind: String = table.get("type")?;
        let kind = ChangeKind::parse(&kind).ok_or(Error::InvalidChangeType(kind))?;
        let content: Option<String> = table.get("content")?;
        Ok(Self {
            kind,
            content: content.unwrap_or_default(),
        })
    }
}

impl IntoLua for PatchHunk {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("header", self.header)?;
        table.set("changes", lua.create_sequence_from(self.changes)?)?;
        Ok(LuaValue::Table(table))
    }
}

impl IntoLua for PatchFile {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("path", self.path)?;
        table.set("action", self.action.as_str())?;
        table.set("new_path", self.new_path)?;
        table.set("hunks", lua.create_sequence_from(self.hunks)?)?;
        Ok(LuaValue::Table(table))
    }
}

impl IntoLua for ParsedPatch {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("files", lua.create_sequence_from(self.files)?)?;
        Ok(LuaValue::Table(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_update() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             @@\n\
             -old line\n\
             +new line\n\
             *** End Patch\n",
        );

        assert_eq!(
            patch.files,
            vec![PatchFile {
                path: "a.txt".into(),
                action: Action::Update,
                new_path: None,
                hunks: vec![PatchHunk {
                    header: "@@".into(),
                    changes: vec![HunkChange::removed("old line"), HunkChange::added("new line")],
                }],
            }]
        );
    }

    #[test]
    fn move_without_hunks() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: old/path.py\n\
             *** Move to: new/path.py\n\
             *** End Patch",
        );

        assert_eq!(patch.files.len(), 1);
        let file = &patch.files[0];
        assert_eq!(file.action, Action::Move);
        assert_eq!(file.path, "old/path.py");
        assert_eq!(file.new_path.as_deref(), Some("new/path.py"));
        assert!(file.hunks.is_empty());
    }

    #[test]
    fn move_keeps_following_hunks() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.py\n\
             *** Move to: b.py\n\
             @@ def f():\n\
             -    return 1\n\
             +    return 2\n\
             *** End Patch",
        );

        let file = &patch.files[0];
        assert_eq!(file.action, Action::Move);
        assert_eq!(file.hunks.len(), 1);
        assert_eq!(file.hunks[0].header, "@@ def f():");
        assert_eq!(file.hunks[0].changes.len(), 2);
    }

    #[test]
    fn last_file_flushed_without_end_marker() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Add File: first.txt\n\
             +one\n\
             *** Update File: last.txt\n\
             @@\n\
             -a\n\
             +b",
        );

        assert_eq!(patch.files.len(), 2);
        let last = &patch.files[1];
        assert_eq!(last.path, "last.txt");
        assert_eq!(
            last.hunks[0].changes,
            vec![HunkChange::removed("a"), HunkChange::added("b")]
        );
    }

    #[test]
    fn unknown_marker_is_dropped() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             @@\n\
              \x20keep\n\
             # not a diff line\n\
             +added\n\
             *** End Patch",
        );

        let changes = &patch.files[0].hunks[0].changes;
        assert_eq!(
            changes,
            &vec![HunkChange::context("keep"), HunkChange::added("added")]
        );
        assert!(changes.iter().all(|c| !c.content.contains('#')));
    }

    #[test]
    fn files_keep_source_order() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Delete File: c.txt\n\
             *** Add File: a.txt\n\
             +a\n\
             *** Update File: b.txt\n\
             *** Move to: z.txt\n\
             *** End Patch",
        );

        let summary: Vec<_> = patch
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.action))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("c.txt", Action::Delete),
                ("a.txt", Action::Add),
                ("b.txt", Action::Move),
            ]
        );
    }

    #[test]
    fn content_without_header_starts_implicit_hunk() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Add File: hello.txt\n\
             +hello\n\
             +world\n\
             *** End Patch",
        );

        let hunks = &patch.files[0].hunks;
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].header, "");
        assert_eq!(hunks[0].changes.len(), 2);
    }

    #[test]
    fn each_header_starts_a_new_hunk() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             -implicit\n\
             @@ first\n\
             -x\n\
             @@ second\n\
             +y\n\
             *** End Patch",
        );

        let headers: Vec<_> = patch.files[0]
            .hunks
            .iter()
            .map(|h| h.header.as_str())
            .collect();
        assert_eq!(headers, vec!["", "@@ first", "@@ second"]);
    }

    #[test]
    fn empty_line_is_empty_context() {
        let patch = parse_patch("*** Begin Patch\n*** Update File: a.txt\n@@\n x\n\n y\n");
        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![
                HunkChange::context("x"),
                HunkChange::context(""),
                HunkChange::context("y"),
            ]
        );
    }

    #[test]
    fn lines_before_begin_marker_are_skipped() {
        let patch = parse_patch(
            "Here is the patch:\n\
             *** Update File: ignored.txt\n\
             -ignored\n\
             *** Begin Patch\n\
             *** Delete File: gone.txt\n\
             *** End Patch\n\
             trailing chatter",
        );

        assert_eq!(patch.files.len(), 1);
        assert_eq!(patch.files[0].path, "gone.txt");
        // The chatter still opens an implicit hunk on the current file, but is dropped.
        assert!(patch.files[0].hunks.iter().all(|h| h.changes.is_empty()));
    }

    #[test]
    fn header_before_any_file_is_discarded() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             @@ stray\n\
             +stray\n\
             *** Update File: a.txt\n\
             +kept\n\
             *** End Patch",
        );

        assert_eq!(patch.files.len(), 1);
        assert_eq!(patch.files[0].hunks.len(), 1);
        assert_eq!(patch.files[0].hunks[0].header, "");
        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![HunkChange::added("kept")]
        );
    }

    #[test]
    fn move_outside_file_is_dropped() {
        let patch = parse_patch("*** Begin Patch\n*** Move to: nowhere.txt\n*** End Patch");
        assert!(patch.files.is_empty());
    }

    #[test]
    fn end_of_file_marker_is_consumed() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             @@\n\
             +last\n\
             *** End of File\n\
             *** End Patch",
        );

        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![HunkChange::added("last")]
        );
    }

    #[test]
    fn paths_are_trimmed() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File:   spaced.txt  \n\
             *** Move to:  moved.txt \n\
             *** End Patch",
        );

        assert_eq!(patch.files[0].path, "spaced.txt");
        assert_eq!(patch.files[0].new_path.as_deref(), Some("moved.txt"));
    }

    #[test]
    fn directive_without_path_is_not_a_directive() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             *** Add File: \n\
             +still a.txt\n\
             *** End Patch",
        );

        assert_eq!(patch.files.len(), 1);
        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![HunkChange::added("still a.txt")]
        );
    }

    #[test]
    fn content_after_end_marker_stays_with_current_file() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.txt\n\
             -x\n\
             *** End Patch\n\
             +y",
        );

        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![HunkChange::removed("x"), HunkChange::added("y")]
        );
    }

    #[test]
    fn crlf_line_endings() {
        let patch = parse_patch("*** Begin Patch\r\n*** Update File: a.txt\r\n-a\r\n+b\r\n*** End Patch\r\n");
        assert_eq!(
            patch.files[0].hunks[0].changes,
            vec![HunkChange::removed("a"), HunkChange::added("b")]
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(parse_patch(""), ParsedPatch::default());
        assert_eq!(parse_patch("*** Begin Patch\n*** End Patch"), ParsedPatch::default());
    }

    #[test]
    fn serializes_like_the_web_viewer() {
        let patch = parse_patch(
            "*** Begin Patch\n\
             *** Update File: a.py\n\
             *** Move to: b.py\n\
             @@\n\
             -x\n\
             *** Add File: c.py\n\
             *** End Patch",
        );

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "files": [
                    {
                        "path": "a.py",
                        "action": "move",
                        "newPath": "b.py",
                        "hunks": [{"header": "@@", "changes": [{"type": "removed", "content": "x"}]}]
                    },
                    {"path": "c.py", "action": "add", "hunks": []}
                ]
            })
        );
    }

    #[test]
    fn split_single_patch_is_unchanged() {
        let text = "*** Begin Patch\n*** Add File: a.txt\n+a\n*** End Patch";
        assert_eq!(split_patches(text), vec![text.to_string()]);
        assert_eq!(split_patches(""), vec![String::new()]);
    }

    #[test]
    fn split_multiple_patches_collapses_repeated_end_markers() {
        let text = "*** Begin Patch\n\
                    *** Add File: foo.py\n\
                    + foo\n\
                    *** End Patch\n\
                    *** End Patch\n\
                    *** Begin Patch\n\
                    *** Add File: bar.py\n\
                    + bar\n\
                    *** End Patch\n\
                    *** End Patch\n\
                    *** End Patch";

        assert_eq!(
            split_patches(text),
            vec![
                "*** Begin Patch\n*** Add File: foo.py\n+ foo\n*** End Patch\n".to_string(),
                "*** Begin Patch\n*** Add File: bar.py\n+ bar\n*** End Patch\n".to_string(),
            ]
        );
    }

    #[test]
    fn split_drops_preamble() {
        let text = "preamble\n*** Begin Patch\n*** Delete File: a\n*** End Patch\n*** Begin Patch\n*** Delete File: b\n*** End Patch\n";
        let patches = split_patches(text);
        assert_eq!(patches.len(), 2);
        assert!(patches.iter().all(|p| p.starts_with(BEGIN_PATCH)));
        assert_eq!(parse_patch(&patches[1]).files[0].path, "b");
    }

    #[test]
    fn display_path_strips_one_git_prefix() {
        assert_eq!(display_path("a/src/main.rs"), "src/main.rs");
        assert_eq!(display_path("b/src/main.rs"), "src/main.rs");
        assert_eq!(display_path("a/b/c.rs"), "b/c.rs");
        assert_eq!(display_path("src/a/main.rs"), "src/a/main.rs");
        assert_eq!(display_path("abc.rs"), "abc.rs");
    }

    #[test]
    fn change_kind_parse_round_trips() {
        for kind in [ChangeKind::Context, ChangeKind::Removed, ChangeKind::Added] {
            assert_eq!(ChangeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChangeKind::parse("moved"), None);
    }
}
