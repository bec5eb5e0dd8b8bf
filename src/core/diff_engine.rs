use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

pub const DEFAULT_MAX_CHARS: usize = 100_000;
pub const DEFAULT_MAX_LINES: usize = 1_000;
pub const TRUNCATION_MARKER: &str = "[... content truncated ...]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffLimits {
    pub max_chars: usize,
    pub max_lines: usize,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiffKind {
    Unchanged,
    Removed,
    Added,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: DiffKind,
    pub text: String,
}

impl DiffEntry {
    fn new(kind: DiffKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }

    fn prefix(&self) -> char {
        match self.kind {
            DiffKind::Unchanged => ' ',
            DiffKind::Removed => '-',
            DiffKind::Added => '+',
        }
    }
}

/// Lines of one file revision, already cut down to the comparison limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl TextBlock {
    pub fn from_text(text: &str, limits: &DiffLimits) -> Self {
        let mut truncated = false;

        let text = match text.char_indices().nth(limits.max_chars) {
            Some((cut, _)) => {
                truncated = true;
                &text[..cut]
            }
            None => text,
        };

        let mut lines = split_lines(text);
        if lines.len() > limits.max_lines {
            lines.truncate(limits.max_lines);
            truncated = true;
        }

        let mut lines: Vec<String> = lines.into_iter().map(str::to_string).collect();
        if truncated {
            lines.push(TRUNCATION_MARKER.to_string());
        }

        Self { lines, truncated }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// `\r\n`, `\n` and a lone `\r` each terminate a line. Empty input has no lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }

    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&text[start..]);

    lines
}

pub fn compute_diff(original: &str, modified: &str) -> Vec<DiffEntry> {
    compute_diff_with_limits(original, modified, &DiffLimits::default())
}

pub fn compute_diff_with_limits(
    original: &str,
    modified: &str,
    limits: &DiffLimits,
) -> Vec<DiffEntry> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let old_block = TextBlock::from_text(original, limits);
        let new_block = TextBlock::from_text(modified, limits);
        if old_block.truncated || new_block.truncated {
            debug!(
                "Truncated diff input (original: {} chars, modified: {} chars)",
                original.len(),
                modified.len()
            );
        }
        diff_blocks(&old_block, &new_block)
    }));

    match result {
        Ok(entries) => entries,
        Err(_) => {
            warn!(
                "Diff computation failed (original: {} bytes, modified: {} bytes); returning empty edit script",
                original.len(),
                modified.len()
            );
            Vec::new()
        }
    }
}

pub fn diff_blocks(original: &TextBlock, modified: &TextBlock) -> Vec<DiffEntry> {
    let old = &original.lines;
    let new = &modified.lines;

    if old.is_empty() {
        return new.iter().map(|l| DiffEntry::new(DiffKind::Added, l)).collect();
    }
    if new.is_empty() {
        return old.iter().map(|l| DiffEntry::new(DiffKind::Removed, l)).collect();
    }

    let table = LcsTable::build(old, new);
    let mut entries = Vec::with_capacity(old.len().max(new.len()));
    let (mut i, mut j) = (old.len(), new.len());

    // Walked back from the end of both blocks, then reversed.
    while i > 0 && j > 0 {
        if old[i - 1] == new[j - 1] {
            entries.push(DiffEntry::new(DiffKind::Unchanged, &old[i - 1]));
            i -= 1;
            j -= 1;
        } else if table.get(i - 1, j) >= table.get(i, j - 1) {
            // Ties mark the original line Removed.
            entries.push(DiffEntry::new(DiffKind::Removed, &old[i - 1]));
            i -= 1;
        } else {
            entries.push(DiffEntry::new(DiffKind::Added, &new[j - 1]));
            j -= 1;
        }
    }
    entries.extend(old[..i].iter().rev().map(|l| DiffEntry::new(DiffKind::Removed, l)));
    entries.extend(new[..j].iter().rev().map(|l| DiffEntry::new(DiffKind::Added, l)));

    entries.reverse();
    entries
}

/// Prefix LCS lengths: `get(i, j)` is the LCS of `old[..i]` and `new[..j]`.
struct LcsTable {
    cells: Vec<u32>,
    width: usize,
}

impl LcsTable {
    fn build(old: &[String], new: &[String]) -> Self {
        let width = new.len() + 1;
        let mut cells = vec![0u32; (old.len() + 1) * width];

        for i in 1..=old.len() {
            for j in 1..=new.len() {
                cells[i * width + j] = if old[i - 1] == new[j - 1] {
                    cells[(i - 1) * width + j - 1] + 1
                } else {
                    cells[(i - 1) * width + j].max(cells[i * width + j - 1])
                };
            }
        }

        Self { cells, width }
    }

    fn get(&self, i: usize, j: usize) -> u32 {
        self.cells[i * self.width + j]
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl DiffStats {
    pub fn from_entries(entries: &[DiffEntry]) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            match entry.kind {
                DiffKind::Added => stats.added += 1,
                DiffKind::Removed => stats.removed += 1,
                DiffKind::Unchanged => stats.unchanged += 1,
            }
        }
        stats
    }

    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// One `+`/`-`/` ` line per entry, with no hunk headers.
pub fn render_edit_script(entries: &[DiffEntry]) -> String {
    let mut output = String::new();
    for entry in entries {
        output.push(entry.prefix());
        output.push_str(&entry.text);
        output.push('\n');
    }
    output
}

/// Renders only the changed regions with `context_lines` of surrounding
/// unchanged lines, as `@@ -a,b +c,d @@` hunks. A non-zero `max_chars`
/// caps the output and appends `[Diff truncated]` when hit.
pub fn render_unified(entries: &[DiffEntry], context_lines: usize, max_chars: usize) -> String {
    let mut output = String::new();

    for hunk in group_hunks(entries, context_lines) {
        let mut block = format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
        );
        for entry in &entries[hunk.range.clone()] {
            block.push(entry.prefix());
            block.push_str(&entry.text);
            block.push('\n');
        }

        if max_chars > 0 && output.len().saturating_add(block.len()) > max_chars {
            for line in block.lines() {
                if output.len() + line.len() + 1 > max_chars {
                    break;
                }
                output.push_str(line);
                output.push('\n');
            }
            output.push_str("[Diff truncated]\n");
            break;
        }
        output.push_str(&block);
    }

    output
}

struct Hunk {
    range: std::ops::Range<usize>,
    old_start: usize,
    old_lines: usize,
    new_start: usize,
    new_lines: usize,
}

fn group_hunks(entries: &[DiffEntry], context_lines: usize) -> Vec<Hunk> {
    let changed: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind != DiffKind::Unchanged)
        .map(|(idx, _)| idx)
        .collect();

    let mut ranges: Vec<std::ops::Range<usize>> = Vec::new();
    for idx in changed {
        let start = idx.saturating_sub(context_lines);
        let end = (idx + context_lines + 1).min(entries.len());
        match ranges.last_mut() {
            Some(last) if start <= last.end => last.end = last.end.max(end),
            _ => ranges.push(start..end),
        }
    }

    // Line numbers before each entry, 1-based.
    let mut old_line = 1;
    let mut new_line = 1;
    let mut positions = Vec::with_capacity(entries.len());
    for entry in entries {
        positions.push((old_line, new_line));
        match entry.kind {
            DiffKind::Unchanged => {
                old_line += 1;
                new_line += 1;
            }
            DiffKind::Removed => old_line += 1,
            DiffKind::Added => new_line += 1,
        }
    }

    ranges
        .into_iter()
        .map(|range| {
            let (old_start, new_start) = positions[range.start];
            let stats = DiffStats::from_entries(&entries[range.clone()]);
            Hunk {
                range,
                old_start,
                old_lines: stats.unchanged + stats.removed,
                new_start,
                new_lines: stats.unchanged + stats.added,
            }
        })
        .collect()
}
