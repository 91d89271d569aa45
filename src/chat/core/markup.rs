//! Line-break markup handling for message bodies.
//!
//! Message text is stored with `<br>` in place of newlines because the rendering
//! layer interprets that markup directly. [`normalize_text`] performs that
//! conversion and runs exactly once, when a message is created. Stored text,
//! remote records and cached threads are never normalized again.

use regex::Regex;

/// Line-break markup stored in message bodies.
pub const LINE_BREAK: &str = "<br>";

/// Convert literal `\n` escapes and raw newlines into [`LINE_BREAK`].
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\r\n", "\n")
        .replace('\n', LINE_BREAK)
}

/// Compiled patterns used to strip markup and recognise placeholder names.
#[derive(Clone, Debug)]
pub struct Markup {
    line_break: Regex,
    tag: Regex,
    whitespace: Regex,
    placeholder: Regex,
}

impl Markup {
    /// Placeholder prefix given to fresh threads (`Chat <n>`).
    pub const PLACEHOLDER_PREFIX: &'static str = "Chat";

    /// Compile the patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            line_break: Regex::new(r"(?i)<br\s*/?>")?,
            tag: Regex::new(r"<[^>]*>")?,
            whitespace: Regex::new(r"\s+")?,
            placeholder: Regex::new(r"^Chat \d+$")?,
        })
    }

    /// Placeholder name for the `n`-th thread.
    #[must_use]
    pub fn placeholder_name(n: usize) -> String {
        format!("{} {n}", Self::PLACEHOLDER_PREFIX)
    }

    /// Whether `name` still has the generated `Chat <n>` shape.
    #[must_use]
    pub fn is_placeholder_name(&self, name: &str) -> bool {
        self.placeholder.is_match(name)
    }

    /// Turn stored markup back into plain text, keeping line breaks as `\n`.
    #[must_use]
    pub fn to_plain_text(&self, text: &str) -> String {
        let with_newlines = self.line_break.replace_all(text, "\n");
        self.tag.replace_all(&with_newlines, "").into_owned()
    }

    /// Derive a thread title: markup stripped, whitespace collapsed, at most
    /// `max_chars` characters. `None` when nothing printable is left.
    #[must_use]
    pub fn title_from(&self, text: &str, max_chars: usize) -> Option<String> {
        let plain = self.to_plain_text(text);
        let collapsed = self.whitespace.replace_all(plain.trim(), " ");
        let title: String = collapsed.chars().take(max_chars).collect();
        let title = title.trim_end().to_owned();
        (!title.is_empty()).then_some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_converts_escapes_and_newlines() {
        assert_eq!(normalize_text("a\\nb\nc\r\nd"), "a<br>b<br>c<br>d");
        assert_eq!(normalize_text("plain"), "plain");
    }

    #[test]
    fn test_placeholder_pattern() {
        let markup = Markup::new().unwrap();
        assert!(markup.is_placeholder_name("Chat 1"));
        assert!(markup.is_placeholder_name(&Markup::placeholder_name(12)));
        assert!(!markup.is_placeholder_name("Chat about meds"));
        assert!(!markup.is_placeholder_name("Chat 1 extra"));
        assert!(!markup.is_placeholder_name("Hi"));
    }

    #[test]
    fn test_title_strips_markup_and_truncates() {
        let markup = Markup::new().unwrap();
        let title = markup
            .title_from("<b>Drug</b> interactions<br>with   aspirin", 40)
            .unwrap();
        assert_eq!(title, "Drug interactions with aspirin");

        let long = "x".repeat(100);
        assert_eq!(markup.title_from(&long, 40).unwrap().chars().count(), 40);
        assert_eq!(markup.title_from("<br><i></i>", 40), None);
    }

    #[test]
    fn test_plain_text_keeps_line_breaks() {
        let markup = Markup::new().unwrap();
        assert_eq!(markup.to_plain_text("one<br>two<BR/><span>three</span>"), "one\ntwo\nthree");
    }
}
