//! Cleanup of captured command output before it is logged or displayed.
//!
//! borg prints progress and stats with terminal escapes when it thinks it is
//! talking to a TTY; those are stripped. Log lines are capped by keeping the
//! head and tail of the output, where the invocation echo and the final
//! stats or error live.

/// Longest excerpt written to the log for a single command.
pub const LOG_EXCERPT_CHARS: usize = 8_000;

/// Strip ANSI escape codes and decode lossily as UTF-8.
pub fn clean(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Join stdout and stderr the way a terminal would show them: stdout first.
pub fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = clean(stdout);
    let err = clean(stderr);
    if !text.is_empty() && !err.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&err);
    text
}

/// Shorten `text` to about `max_chars` characters, eliding the middle.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }

    let keep = max_chars / 2;
    let head_end = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail_start = text
        .char_indices()
        .nth(total - keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    format!(
        "{}\n[... {} chars elided ...]\n{}",
        &text[..head_end],
        total - 2 * keep,
        &text[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_are_removed() {
        assert_eq!(clean(b"\x1b[1mArchive\x1b[0m created"), "Archive created");
    }

    #[test]
    fn stderr_follows_stdout_on_its_own_line() {
        assert_eq!(combine(b"out", b"err\n"), "out\nerr\n");
        assert_eq!(combine(b"", b"err"), "err");
        assert_eq!(combine(b"out\n", b""), "out\n");
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(excerpt("stats", 100), "stats");
    }

    #[test]
    fn long_text_keeps_both_ends() {
        let text = format!("{}{}{}", "H".repeat(50), "m".repeat(100), "T".repeat(50));
        let out = excerpt(&text, 100);
        assert!(out.starts_with(&"H".repeat(50)));
        assert!(out.ends_with(&"T".repeat(50)));
        assert!(out.contains("[... 100 chars elided ...]"));
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let text = "é".repeat(500);
        let out = excerpt(&text, 11);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.contains("490 chars elided"));
    }
}
