//! Free-text sanitization for user-entered descriptions.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a sanitized text field, in characters.
pub const MAX_TEXT_CHARS: usize = 500;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>")
        .expect("script pattern is valid")
});

/// Strip script blocks, angle brackets and control characters, trim, and cap
/// the result at [`MAX_TEXT_CHARS`].
pub fn sanitize_text(input: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(input, "");
    without_scripts
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_TEXT_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(sanitize_text("Road blocked near bridge"), "Road blocked near bridge");
    }

    #[test]
    fn script_blocks_are_removed() {
        assert_eq!(
            sanitize_text("before<script>alert('x')</script>after"),
            "beforeafter"
        );
        assert_eq!(
            sanitize_text("a<SCRIPT type=\"text/javascript\">x<y</SCRIPT>b"),
            "ab"
        );
    }

    #[test]
    fn closing_tags_inside_script_do_not_end_it() {
        assert_eq!(sanitize_text("a<script>x</span>y</script>b"), "ab");
        assert_eq!(
            sanitize_text("a<script>1</script>mid<script>2</sCrIpT >b"),
            "amidb"
        );
    }

    #[test]
    fn markup_brackets_and_controls_are_stripped() {
        assert_eq!(sanitize_text("  <b>bold</b>\u{0007}\u{001b}[31m "), "bbold/b[31m");
        assert_eq!(sanitize_text("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn length_is_capped_in_characters() {
        let long = "ї".repeat(800);
        let cleaned = sanitize_text(&long);
        assert_eq!(cleaned.chars().count(), MAX_TEXT_CHARS);
    }
}
