//! Mode-sensitive tokenizer with a backtracking buffer.
//!
//! Tokens produced since the last [`Tokenizer::discard`] stay buffered, so the
//! parser can [`reset`](Tokenizer::reset) and read the same text again under
//! another [`TokenizationMode`]. A buffered token is reused only if it was
//! lexed with the same mode and line-break flag; otherwise the buffer is cut
//! at that point and the rest is lexed again.

use std::collections::HashSet;

use crate::diagnostics::Report;
use crate::err_at;
use crate::options::EscapePolicy;
use crate::source::Source;
use crate::syntax::operators::OperatorRegistry;
use crate::syntax::token::{Token, TokenKind, TokenizationMode};

#[derive(Debug)]
struct Buffered {
    token: Token,
    mode: TokenizationMode,
    skip_line_break: bool,
}

#[derive(Debug)]
pub struct Tokenizer<'s> {
    chars: &'s [char],
    escapes: EscapePolicy,
    /// Offset of the first character not yet committed by `discard`.
    anchor: usize,
    buffer: Vec<Buffered>,
    /// Index into `buffer` of the next token to hand out.
    cursor: usize,
    reports: Vec<Report>,
    /// Offsets already reported; re-lexing after a reset must not repeat them.
    reported: HashSet<usize>,
}

impl<'s> Tokenizer<'s> {
    pub fn new(source: &'s Source, escapes: EscapePolicy) -> Self {
        Self {
            chars: source.chars(),
            escapes,
            anchor: 0,
            buffer: Vec::new(),
            cursor: 0,
            reports: Vec::new(),
            reported: HashSet::new(),
        }
    }

    /// Returns the next token under `mode`.
    ///
    /// With `skip_line_break`, line breaks are skipped like any other
    /// whitespace; otherwise each one is an [`TokenKind::Eol`] token.
    pub fn next(
        &mut self,
        skip_line_break: bool,
        mode: TokenizationMode,
        operators: &OperatorRegistry,
    ) -> Token {
        if let Some(buffered) = self.buffer.get(self.cursor) {
            if buffered.mode == mode && buffered.skip_line_break == skip_line_break {
                self.cursor += 1;
                return buffered.token.clone();
            }
            self.buffer.truncate(self.cursor);
        }
        let token = self.lex(self.position(), skip_line_break, mode, operators);
        self.buffer.push(Buffered {
            token: token.clone(),
            mode,
            skip_line_break,
        });
        self.cursor += 1;
        token
    }

    /// Commits every token handed out since the last discard.
    pub fn discard(&mut self) {
        self.anchor = self.position();
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
    }

    /// Rewinds to the last discard point. With `discard_extra`, buffered
    /// lookahead is dropped too and everything is lexed again.
    pub fn reset(&mut self, discard_extra: bool) {
        self.cursor = 0;
        if discard_extra {
            self.buffer.clear();
        }
    }

    /// Offset right after the last token handed out.
    pub fn position(&self) -> usize {
        match self.cursor {
            0 => self.anchor,
            n => self.buffer[n - 1].token.end,
        }
    }

    pub fn take_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.reports)
    }

    // ------------------------------------------------------------------------
    // Lexing
    // ------------------------------------------------------------------------

    fn lex(
        &mut self,
        pos: usize,
        skip_line_break: bool,
        mode: TokenizationMode,
        operators: &OperatorRegistry,
    ) -> Token {
        let start = match self.skip_trivia(pos, skip_line_break) {
            Ok(start) => start,
            Err(token) => return token,
        };
        let Some(&c) = self.chars.get(start) else {
            return Token::new(TokenKind::Eof, self.chars.len(), self.chars.len());
        };
        let structural = match c {
            '\n' => Some(TokenKind::Eol),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            ',' => Some(TokenKind::Comma),
            '[' if mode != TokenizationMode::Key => Some(TokenKind::LBracket),
            ']' if mode != TokenizationMode::Key => Some(TokenKind::RBracket),
            '(' if mode != TokenizationMode::Key => Some(TokenKind::LParen),
            ')' if mode != TokenizationMode::Key => Some(TokenKind::RParen),
            ':' if colon_delimits(mode) => Some(TokenKind::Colon),
            '=' if mode == TokenizationMode::ParamName => Some(TokenKind::Equals),
            _ => None,
        };
        if let Some(kind) = structural {
            return Token::new(kind, start, start + 1);
        }
        if c == '"' || c == '\'' {
            return self.quoted(start, c);
        }
        if mode == TokenizationMode::Operation {
            if let Some(name) = self.keyword_at(start, operators) {
                let end = start + name.chars().count();
                return Token::with_text(TokenKind::Keyword, name, start, end);
            }
            if let Some(name) = self.operator_at(start, operators) {
                let end = start + name.chars().count();
                return Token::with_text(TokenKind::Operator, name, start, end);
            }
        }
        self.literal(start, mode, operators)
    }

    /// Skips whitespace, comments and line continuations. An unterminated
    /// block comment yields an error token spanning the rest of the input.
    fn skip_trivia(&mut self, mut i: usize, skip_line_break: bool) -> Result<usize, Token> {
        loop {
            match (self.chars.get(i), self.chars.get(i + 1)) {
                (None, _) => return Ok(i),
                (Some('\n'), _) if !skip_line_break => return Ok(i),
                (Some(c), _) if c.is_whitespace() => i += 1,
                (Some('\\'), Some('\n')) => i += 2,
                (Some('/'), Some('/')) => {
                    while self.chars.get(i).is_some_and(|c| *c != '\n') {
                        i += 1;
                    }
                }
                (Some('/'), Some('*')) => {
                    let body = i + 2;
                    match self.chars[body..].windows(2).position(|w| w == ['*', '/']) {
                        Some(len) => i = body + len + 2,
                        None => {
                            self.report(
                                err_at!(Lexical, i, "unterminated block comment")
                                    .hint("close the comment with '*/'"),
                            );
                            return Err(Token::new(TokenKind::Error, i, self.chars.len()));
                        }
                    }
                }
                _ => return Ok(i),
            }
        }
    }

    fn literal(&mut self, start: usize, mode: TokenizationMode, operators: &OperatorRegistry) -> Token {
        let stops_at_whitespace = !matches!(mode, TokenizationMode::Value | TokenizationMode::Key);
        let mut text = String::new();
        let mut i = start;
        // Trailing whitespace is not part of the literal.
        let (mut kept_len, mut kept_end) = (0, start);
        while let Some(&c) = self.chars.get(i) {
            if c == '\\' {
                match self.chars.get(i + 1) {
                    Some('\n') => {
                        i += 2;
                        continue;
                    }
                    Some(_) => {
                        let (decoded, next) = self.escape(i);
                        text.push_str(&decoded);
                        i = next;
                    }
                    None => {
                        text.push('\\');
                        i += 1;
                    }
                }
                kept_len = text.len();
                kept_end = i;
                continue;
            }
            if is_delimiter(c, mode) {
                break;
            }
            if c.is_whitespace() {
                if stops_at_whitespace {
                    break;
                }
                text.push(c);
                i += 1;
                continue;
            }
            if c == '/' && matches!(self.chars.get(i + 1), Some('/' | '*')) {
                break;
            }
            if mode == TokenizationMode::Operation && i > start && self.operator_at(i, operators).is_some() {
                break;
            }
            text.push(c);
            i += 1;
            kept_len = text.len();
            kept_end = i;
        }
        text.truncate(kept_len);
        Token::with_text(TokenKind::Literal, text, start, kept_end)
    }

    fn quoted(&mut self, start: usize, quote: char) -> Token {
        let mut text = String::new();
        let mut i = start + 1;
        loop {
            match self.chars.get(i) {
                None => {
                    self.report(
                        err_at!(Lexical, start, "unterminated quoted literal")
                            .hint(format!("close the literal with {quote}")),
                    );
                    return Token::with_text(TokenKind::Quoted, text, start, i);
                }
                Some(&c) if c == quote => {
                    return Token::with_text(TokenKind::Quoted, text, start, i + 1);
                }
                Some('\\') => match self.chars.get(i + 1) {
                    Some('\n') => i += 2,
                    Some(_) => {
                        let (decoded, next) = self.escape(i);
                        text.push_str(&decoded);
                        i = next;
                    }
                    None => i += 1,
                },
                Some('\r') if self.chars.get(i + 1) == Some(&'\n') => i += 1,
                Some('\n') => {
                    text.push('\n');
                    i += 1;
                    // Line folding: indentation up to a leading '|' is dropped.
                    let mut j = i;
                    while matches!(self.chars.get(j), Some(' ' | '\t')) {
                        j += 1;
                    }
                    if self.chars.get(j) == Some(&'|') {
                        i = j + 1;
                    }
                }
                Some(&c) => {
                    text.push(c);
                    i += 1;
                }
            }
        }
    }

    /// Decodes the escape sequence whose backslash sits at `i`, returning the
    /// text and the offset after the consumed characters. A malformed unicode
    /// escape consumes only the backslash and its letter.
    fn escape(&mut self, i: usize) -> (String, usize) {
        let letter = self.chars[i + 1];
        let digits = match letter {
            'n' => return ("\n".into(), i + 2),
            't' => return ("\t".into(), i + 2),
            'r' => return ("\r".into(), i + 2),
            'u' => 4,
            'U' => 6,
            other => return (other.to_string(), i + 2),
        };
        let hex: String = self.chars[i + 2..].iter().take(digits).collect();
        let decoded = (hex.len() == digits && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| u32::from_str_radix(&hex, 16).ok())
            .flatten()
            .and_then(char::from_u32);
        match decoded {
            Some(c) => (c.to_string(), i + 2 + digits),
            None => {
                if let Some(severity) = self.escapes.severity() {
                    let shown: String = hex.chars().take_while(char::is_ascii_hexdigit).collect();
                    self.report(
                        err_at!(Lexical, i, "invalid unicode escape '\\{}{}'", letter, shown)
                            .with_severity(severity)
                            .hint(format!(
                                "'\\{letter}' takes exactly {digits} hexadecimal digits naming a code point"
                            )),
                    );
                }
                (letter.to_string(), i + 2)
            }
        }
    }

    fn operator_at<'r>(&self, i: usize, operators: &'r OperatorRegistry) -> Option<&'r str> {
        let first = *self.chars.get(i)?;
        operators
            .operators_starting_with(first)
            .iter()
            .map(String::as_str)
            .filter(|name| self.starts_with(i, name))
            .find(|name| *name != "." || !self.between_digits(i))
    }

    fn keyword_at<'r>(&self, i: usize, operators: &'r OperatorRegistry) -> Option<&'r str> {
        let first = *self.chars.get(i)?;
        operators
            .keywords_starting_with(first)
            .iter()
            .map(String::as_str)
            .find(|name| {
                self.starts_with(i, name)
                    && !self
                        .chars
                        .get(i + name.chars().count())
                        .is_some_and(|c| c.is_alphanumeric() || *c == '_')
            })
    }

    fn starts_with(&self, i: usize, name: &str) -> bool {
        let mut at = i;
        for c in name.chars() {
            if self.chars.get(at) != Some(&c) {
                return false;
            }
            at += 1;
        }
        true
    }

    fn between_digits(&self, i: usize) -> bool {
        i > 0
            && self.chars[i - 1].is_ascii_digit()
            && self.chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
    }

    fn report(&mut self, report: Report) {
        let offset = report.offset.unwrap_or(usize::MAX);
        if self.reported.insert(offset) {
            self.reports.push(report);
        }
    }
}

fn colon_delimits(mode: TokenizationMode) -> bool {
    matches!(
        mode,
        TokenizationMode::Key | TokenizationMode::Word | TokenizationMode::ParamName
    )
}

fn is_delimiter(c: char, mode: TokenizationMode) -> bool {
    match c {
        '{' | '}' | ',' | '\n' => true,
        '[' | ']' | '(' | ')' => mode != TokenizationMode::Key,
        ':' => colon_delimits(mode),
        '=' => mode == TokenizationMode::ParamName,
        _ => false,
    }
}
