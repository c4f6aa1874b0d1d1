//! Tokens and tokenization modes.

use std::fmt;

/// How the tokenizer interprets the characters at the current position.
///
/// The same text means different things at different grammar positions, so
/// the parser picks the mode for every token it asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizationMode {
    /// Values inside objects and lists: a literal spans embedded whitespace
    /// and `:` is an ordinary character.
    Value,
    /// Object keys: `[`, `]`, `(` and `)` are ordinary characters.
    Key,
    /// Names and statement keywords: stops at whitespace and every delimiter.
    Word,
    /// Macro parameter declarations: like [`Word`](Self::Word) with `=`.
    ParamName,
    /// Operator symbols in definitions: `:` is an ordinary character.
    Symbol,
    /// Operation bodies: splits literals around registered operators and
    /// keywords.
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Equals,
    Eol,
    Eof,
    Literal,
    Quoted,
    Operator,
    Keyword,
    /// Unterminated block comment.
    Error,
}

impl TokenKind {
    pub fn is_opener(self) -> bool {
        matches!(self, TokenKind::LBrace | TokenKind::LBracket | TokenKind::LParen)
    }

    pub fn is_closer(self) -> bool {
        matches!(self, TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen)
    }

    /// The closer matching an opener.
    pub fn closer(self) -> Option<TokenKind> {
        match self {
            TokenKind::LBrace => Some(TokenKind::RBrace),
            TokenKind::LBracket => Some(TokenKind::RBracket),
            TokenKind::LParen => Some(TokenKind::RParen),
            _ => None,
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, TokenKind::Literal | TokenKind::Quoted)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Equals => "'='",
            TokenKind::Eol => "line break",
            TokenKind::Eof => "end of input",
            TokenKind::Literal => "literal",
            TokenKind::Quoted => "quoted literal",
            TokenKind::Operator => "operator",
            TokenKind::Keyword => "keyword",
            TokenKind::Error => "invalid input",
        })
    }
}

/// A token with its codepoint range; `text` holds the decoded content of
/// literals, operators and keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, end: usize) -> Self {
        Self {
            kind,
            text: String::new(),
            start,
            end,
        }
    }

    pub fn with_text(kind: TokenKind, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            start,
            end,
        }
    }

    /// Whether this is the unquoted literal `word`.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Literal && self.text == word
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Literal | TokenKind::Operator | TokenKind::Keyword => {
                write!(f, "'{}'", self.text)
            }
            TokenKind::Quoted => write!(f, "\"{}\"", self.text),
            kind => write!(f, "{kind}"),
        }
    }
}
