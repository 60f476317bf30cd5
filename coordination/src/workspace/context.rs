//! Code excerpts for prompt contexts

use crate::ticket::CodeLocation;

/// Lines around `location` with `>>` marking the flagged range.
pub fn render_excerpt(text: &str, location: &CodeLocation, radius: u32) -> String {
    let start = location.start_line.max(1);
    let end = location.end();
    let from = start.saturating_sub(radius).max(1);
    let to = end.saturating_add(radius);

    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        let number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        if number < from {
            continue;
        }
        if number > to {
            break;
        }
        let marker = if (start..=end).contains(&number) { ">>" } else { "  " };
        out.push_str(&format!("{marker} {number:>5} | {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_marks_flagged_line() {
        let text = (1..=20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let excerpt = render_excerpt(&text, &CodeLocation::new("a.c", 10), 2);
        let lines: Vec<&str> = excerpt.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("line 8"));
        assert!(lines[2].starts_with(">>"));
        assert!(lines[2].contains("line 10"));
        assert!(lines[3].starts_with("  "));
    }

    #[test]
    fn test_excerpt_clamps_at_file_edges() {
        let text = "a\nb\nc";
        let location = CodeLocation {
            file: "a.c".into(),
            start_line: 1,
            end_line: Some(2),
        };
        let excerpt = render_excerpt(text, &location, 5);
        assert_eq!(excerpt.lines().count(), 3);
        assert_eq!(excerpt.lines().filter(|l| l.starts_with(">>")).count(), 2);
    }
}
