pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Renders `content` with right-aligned line numbers starting at `start_line`,
/// separated from the text by a tab. When `max_lines` cuts the output short,
/// [`TRUNCATION_MARKER`] is appended.
pub fn format_with_line_numbers(content: &str, start_line: usize, max_lines: Option<usize>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let shown = max_lines.map_or(lines.len(), |max| max.min(lines.len()));
    let last_number = start_line + shown.saturating_sub(1);
    let width = last_number.to_string().len();

    let mut out = lines[..shown]
        .iter()
        .enumerate()
        .map(|(index, line)| format!("{:>width$}\t{line}", start_line + index))
        .collect::<Vec<_>>()
        .join("\n");

    if shown < lines.len() {
        out.push_str(TRUNCATION_MARKER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_widest_number() {
        let content = (1..=10).map(|n| format!("l{n}")).collect::<Vec<_>>().join("\n");
        let out = format_with_line_numbers(&content, 1, None);
        assert!(out.starts_with(" 1\tl1\n"));
        assert!(out.ends_with("10\tl10"));
    }

    #[test]
    fn offset_start_and_truncation() {
        let out = format_with_line_numbers("a\nb\nc", 5, Some(2));
        assert_eq!(out, "5\ta\n6\tb\n...[truncated]");
    }
}
