//! Unified diff model and parser.
//!
//! [`parse`] is a single left-to-right pass over the lines of `git diff`
//! output. It never fails: input it does not understand is skipped, so a
//! malformed diff yields a partial result rather than an error.

use serde::{Deserialize, Serialize};

/// Name used for the missing side of an added or deleted file.
pub const NO_FILE: &str = "/dev/null";

const FILE_MARKER: &str = "diff --git ";
const HUNK_MARKER: &str = "@@";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// A parsed diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    /// Files in the order they appear in the source text.
    pub files: Vec<FileDiff>,

    /// Added lines across all files.
    pub additions: usize,

    /// Deleted lines across all files.
    pub deletions: usize,

    /// The text this result was parsed from, verbatim.
    pub raw_diff: String,
}

impl DiffResult {
    /// Whether the diff touches no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The change to a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    /// Path before the change, [`NO_FILE`] for added files.
    pub old_name: String,

    /// Path after the change, [`NO_FILE`] for deleted files.
    pub new_name: String,

    /// How the file changed.
    pub status: FileStatus,

    /// Added lines in this file.
    pub additions: usize,

    /// Deleted lines in this file.
    pub deletions: usize,

    /// Whether git reported the file as binary.
    pub is_binary: bool,

    /// Hunks in source order.
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Start a file from the remainder of a `diff --git a/<old> b/<new>` line.
    fn from_marker(rest: &str) -> Self {
        let (old_name, new_name) = match rest.split_once(" b/") {
            Some((old, new)) => (old.strip_prefix("a/").unwrap_or(old), new),
            None => (rest.strip_prefix("a/").unwrap_or(rest), ""),
        };

        Self {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            ..Self::default()
        }
    }

    /// The path to show for this file: the new name unless it was deleted.
    pub fn display_name(&self) -> &str {
        if self.status == FileStatus::Deleted {
            &self.old_name
        } else {
            &self.new_name
        }
    }
}

/// How a file changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Modified,
    Added,
    Deleted,
    Renamed,
}

/// A contiguous block of changed lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,

    /// The `@@ ... @@` line this hunk was parsed from.
    pub header: String,

    pub lines: Vec<Line>,
}

impl Hunk {
    fn new(header: &str) -> Self {
        let range = parse_hunk_header(header).unwrap_or_default();
        Self {
            old_start: range.old_start,
            old_lines: range.old_lines,
            new_start: range.new_start,
            new_lines: range.new_lines,
            header: header.to_string(),
            lines: Vec::new(),
        }
    }
}

/// A single line of a hunk, without its leading marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub content: String,
}

/// Kind of hunk line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Add,
    #[serde(rename = "del")]
    Delete,
    Context,
}

/// The four numbers of a hunk header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HunkRange {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
}

/// Parse `@@ -old[,len] +new[,len] @@ ...`. A missing `,len` means 1.
///
/// Returns `None` if the line is not a hunk header or carries no range.
pub fn parse_hunk_header(line: &str) -> Option<HunkRange> {
    let body = line.strip_prefix(HUNK_MARKER)?;
    let ranges = body.split(HUNK_MARKER).next().unwrap_or_default();

    let mut range = HunkRange::default();
    let mut found = false;
    for token in ranges.split_whitespace() {
        if let Some(old) = token.strip_prefix('-') {
            (range.old_start, range.old_lines) = parse_range(old);
            found = true;
        } else if let Some(new) = token.strip_prefix('+') {
            (range.new_start, range.new_lines) = parse_range(new);
            found = true;
        }
    }

    found.then_some(range)
}

fn parse_range(s: &str) -> (u32, u32) {
    match s.split_once(',') {
        Some((start, len)) => (start.parse().unwrap_or(0), len.parse().unwrap_or(0)),
        None => (s.parse().unwrap_or(0), 1),
    }
}

/// Parse unified diff text into a [`DiffResult`].
pub fn parse(raw: &str) -> DiffResult {
    let mut parser = Parser::default();
    if !raw.trim().is_empty() {
        for line in raw.split('\n') {
            parser.feed(line);
        }
    }
    parser.finish(raw)
}

#[derive(Default)]
struct Parser {
    files: Vec<FileDiff>,
    file: Option<FileDiff>,
    hunk: Option<Hunk>,
}

impl Parser {
    fn feed(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix(FILE_MARKER) {
            self.finish_file();
            self.file = Some(FileDiff::from_marker(rest));
            return;
        }

        // Text before the first file marker is not part of any file.
        let Some(file) = self.file.as_mut() else {
            return;
        };

        if line.starts_with(HUNK_MARKER) {
            if let Some(hunk) = self.hunk.take() {
                file.hunks.push(hunk);
            }
            self.hunk = Some(Hunk::new(line));
            return;
        }

        match self.hunk.as_mut() {
            Some(hunk) => body_line(file, hunk, line),
            None => header_line(file, line),
        }
    }

    fn finish_file(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Some(hunk) = self.hunk.take() {
                file.hunks.push(hunk);
            }
            self.files.push(file);
        }
    }

    fn finish(mut self, raw: &str) -> DiffResult {
        self.finish_file();

        let additions = self.files.iter().map(|f| f.additions).sum();
        let deletions = self.files.iter().map(|f| f.deletions).sum();
        DiffResult {
            files: self.files,
            additions,
            deletions,
            raw_diff: raw.to_string(),
        }
    }
}

/// Extended header lines between the file marker and the first hunk.
fn header_line(file: &mut FileDiff, line: &str) {
    if line.starts_with("new file mode") {
        file.status = FileStatus::Added;
        file.old_name = NO_FILE.to_string();
    } else if line.starts_with("deleted file mode") {
        file.status = FileStatus::Deleted;
        file.new_name = NO_FILE.to_string();
    } else if let Some(old) = line.strip_prefix("rename from ") {
        file.status = FileStatus::Renamed;
        file.old_name = old.to_string();
    } else if let Some(new) = line.strip_prefix("rename to ") {
        file.status = FileStatus::Renamed;
        file.new_name = new.to_string();
    } else if line.starts_with("Binary files") {
        file.is_binary = true;
    }
    // index, similarity, mode and ---/+++ echo lines carry nothing we keep.
}

fn body_line(file: &mut FileDiff, hunk: &mut Hunk, line: &str) {
    if line == NO_NEWLINE_MARKER {
        return;
    }

    let (kind, content) = if let Some(content) = line.strip_prefix('+') {
        file.additions += 1;
        (LineKind::Add, content)
    } else if let Some(content) = line.strip_prefix('-') {
        file.deletions += 1;
        (LineKind::Delete, content)
    } else if let Some(content) = line.strip_prefix(' ') {
        (LineKind::Context, content)
    } else {
        return;
    };

    hunk.lines.push(Line {
        kind,
        content: content.to_string(),
    });
}
