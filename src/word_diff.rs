//! Token-level diffing of a change group's old and new text.
//!
//! Text is split into identifier runs, whitespace runs (newlines included)
//! and single punctuation characters, then aligned with Myers diff from
//! [`similar`]. The resulting segments always reconstruct both inputs: the
//! `Unchanged` and `Removed` values concatenate to the old text, the
//! `Unchanged` and `Added` values to the new text.

use crate::options::Options;
use log::debug;
use mlua::prelude::*;
use serde::Serialize;
use similar::{DiffTag, TextDiff};
use smallvec::SmallVec;

/// A one-line edit typically produces at most four segments.
pub type Segments = SmallVec<[WordDiffSegment; 4]>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Unchanged,
    Removed,
    Added,
}

impl SegmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentKind::Unchanged => "unchanged",
            SegmentKind::Removed => "removed",
            SegmentKind::Added => "added",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WordDiffSegment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub value: String,
}

impl WordDiffSegment {
    pub fn new(kind: SegmentKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Whether this segment is part of the old text.
    #[inline]
    pub fn on_old_side(&self) -> bool {
        self.kind != SegmentKind::Added
    }

    /// Whether this segment is part of the new text.
    #[inline]
    pub fn on_new_side(&self) -> bool {
        self.kind != SegmentKind::Removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Space,
    Punct,
}

fn char_class(ch: char) -> CharClass {
    if ch.is_alphanumeric() || ch == '_' {
        CharClass::Word
    } else if ch.is_whitespace() {
        CharClass::Space
    } else {
        CharClass::Punct
    }
}

/// Splits text into identifier runs, whitespace runs and single punctuation
/// characters. Concatenating the tokens yields the input.
pub(crate) fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        let class = char_class(ch);
        let mut end = start + ch.len_utf8();
        if class != CharClass::Punct {
            while let Some(&(idx, next)) = chars.peek() {
                if char_class(next) != class {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }
        }
        tokens.push(&text[start..end]);
    }

    tokens
}

/// Computes the word diff between two text blocks with default options.
pub fn compute_word_diff(old_text: &str, new_text: &str) -> Segments {
    compute_word_diff_with(old_text, new_text, &Options::default())
}

/// Computes the word diff, falling back to a whole-block diff when word
/// diffing is disabled or the inputs exceed `max_word_diff_tokens`.
pub fn compute_word_diff_with(old_text: &str, new_text: &str, options: &Options) -> Segments {
    if !options.word_diff {
        return coarse_diff(old_text, new_text);
    }

    let old_tokens = tokenize(old_text);
    let new_tokens = tokenize(new_text);
    let total = old_tokens.len() + new_tokens.len();
    if total > options.max_word_diff_tokens {
        debug!(
            "word diff of {total} tokens exceeds limit of {}, diffing whole blocks",
            options.max_word_diff_tokens
        );
        return coarse_diff(old_text, new_text);
    }

    let diff = TextDiff::from_slices(old_tokens.as_slice(), new_tokens.as_slice());
    let mut segments = Segments::new();
    for op in diff.ops() {
        let removed = &old_tokens[op.old_range()];
        let added = &new_tokens[op.new_range()];
        match op.tag() {
            DiffTag::Equal => push_tokens(&mut segments, SegmentKind::Unchanged, removed),
            DiffTag::Delete => push_tokens(&mut segments, SegmentKind::Removed, removed),
            DiffTag::Insert => push_tokens(&mut segments, SegmentKind::Added, added),
            DiffTag::Replace => {
                push_tokens(&mut segments, SegmentKind::Removed, removed);
                push_tokens(&mut segments, SegmentKind::Added, added);
            }
        }
    }

    segments
}

/// Appends tokens as one segment, extending the previous segment if it has
/// the same kind. Empty token runs are skipped.
fn push_tokens(segments: &mut Segments, kind: SegmentKind, tokens: &[&str]) {
    if tokens.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(last) if last.kind == kind => {
            for token in tokens {
                last.value.push_str(token);
            }
        }
        _ => segments.push(WordDiffSegment::new(kind, tokens.concat())),
    }
}

fn coarse_diff(old_text: &str, new_text: &str) -> Segments {
    let mut segments = Segments::new();
    if old_text == new_text {
        if !old_text.is_empty() {
            segments.push(WordDiffSegment::new(SegmentKind::Unchanged, old_text));
        }
        return segments;
    }
    if !old_text.is_empty() {
        segments.push(WordDiffSegment::new(SegmentKind::Removed, old_text));
    }
    if !new_text.is_empty() {
        segments.push(WordDiffSegment::new(SegmentKind::Added, new_text));
    }
    segments
}

impl IntoLua for WordDiffSegment {
    fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
        let table = lua.create_table()?;
        table.set("type", self.kind.as_str())?;
        table.set("value", self.value)?;
        Ok(LuaValue::Table(table))
    }
}
