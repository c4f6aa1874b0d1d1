//! Source text handling.
//!
//! A [`Source`] materializes the whole input as a random-accessible codepoint
//! sequence up front; every offset used by the tokenizer, the parser and the
//! reports is an index into that sequence, never a byte offset. Conversions to
//! byte offsets and line/column pairs only happen when a report is rendered.

use miette::NamedSource;
use std::sync::Arc;

/// A named compilation unit.
#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    text: String,
    chars: Vec<char>,
    /// Codepoint offset of the first character of every line.
    line_starts: Vec<usize>,
}

impl Source {
    /// Creates a source from a name (usually a path) and its full text.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::source::Source;
    /// let source = Source::new("demo", "a\nbc");
    /// assert_eq!(source.len(), 4);
    /// assert_eq!(source.line_col(3), (2, 2));
    /// ```
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let chars: Vec<char> = text.chars().collect();
        let mut line_starts = vec![0];
        for (i, c) in chars.iter().enumerate() {
            if *c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            name: name.into(),
            text,
            chars,
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Returns the 1-based line and column of a codepoint offset.
    ///
    /// Offsets past the end are clamped to the end of the source.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.chars.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// Returns the text of the given 1-based line, without its line break.
    pub fn line(&self, line: usize) -> Option<String> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.chars.len());
        Some(
            self.chars[start..end.max(start)]
                .iter()
                .filter(|c| **c != '\r')
                .collect(),
        )
    }

    /// Converts a codepoint offset into a byte offset into the source text.
    pub fn byte_offset(&self, offset: usize) -> usize {
        self.chars[..offset.min(self.chars.len())]
            .iter()
            .map(|c| c.len_utf8())
            .sum()
    }

    /// Converts the source for use with miette error reporting.
    pub fn to_named_source(&self) -> Arc<NamedSource<String>> {
        Arc::new(NamedSource::new(self.name.clone(), self.text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_column_are_one_based() {
        let source = Source::new("t", "ab\ncd\n\nef");
        assert_eq!(source.line_col(0), (1, 1));
        assert_eq!(source.line_col(2), (1, 3));
        assert_eq!(source.line_col(3), (2, 1));
        assert_eq!(source.line_col(6), (3, 1));
        assert_eq!(source.line_col(8), (4, 2));
        assert_eq!(source.line_col(100), (4, 3));
    }

    #[test]
    fn lines_exclude_breaks() {
        let source = Source::new("t", "ab\r\ncd");
        assert_eq!(source.line(1).as_deref(), Some("ab"));
        assert_eq!(source.line(2).as_deref(), Some("cd"));
        assert_eq!(source.line(3), None);
    }

    #[test]
    fn byte_offsets_account_for_multibyte_chars() {
        let source = Source::new("t", "é=x");
        assert_eq!(source.byte_offset(1), 2);
        assert_eq!(source.byte_offset(3), 4);
    }
}
