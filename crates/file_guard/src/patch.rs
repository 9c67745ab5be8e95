use similar::{ChangeTag, TextDiff};

const CONTEXT_LINES: usize = 3;
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One hunk of a unified diff. Line numbers are 1-based; a zero-length range
/// points at the line preceding the change, as unified diff output does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    /// Lines prefixed with `' '`, `'-'`, or `'+'`.
    pub lines: Vec<String>,
}

pub fn structured_patch(old: &str, new: &str) -> Vec<PatchHunk> {
    let diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(CONTEXT_LINES) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                };
                let value = change.value();
                let value = value.strip_suffix('\n').unwrap_or(value);
                lines.push(format!("{prefix}{value}"));
                if change.missing_newline() {
                    lines.push(NO_NEWLINE_MARKER.to_string());
                }
            }
        }

        hunks.push(PatchHunk {
            old_start: hunk_start(old_range.start, old_range.len()),
            old_lines: old_range.len(),
            new_start: hunk_start(new_range.start, new_range.len()),
            new_lines: new_range.len(),
            lines,
        });
    }

    hunks
}

fn hunk_start(zero_based: usize, len: usize) -> usize {
    if len == 0 {
        zero_based
    } else {
        zero_based + 1
    }
}
