//! Character-level tokenizer.
//!
//! The lexer is pulled one token at a time by the parser. It keeps exactly
//! one unconsumed character (`current`) between calls, plus the running
//! row/column of that character.

use std::fmt::{self, Write};
use std::sync::Arc;
use std::str::Chars;

use tracing::trace;

use crate::diagnostic::{Diagnostic, Result};
use crate::span::SourceLocation;

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Name,
    BinaryLiteral,
    OctalLiteral,
    DecimalLiteral,
    HexLiteral,
    FloatLiteral,
    CharLiteral,
    StringLiteral,
    Operator,
    Other,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single token.
///
/// Literal tokens carry decoded text: the radix prefix of integer literals
/// is stripped and escapes inside char/string literals are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub location: SourceLocation,
    pub kind: TokenKind,
    pub text: String,
    /// Exact contents of a char/string literal: escapes as single bytes,
    /// source characters as UTF-8. Empty for every other token. `text` is
    /// the lossy rendering of these bytes.
    pub bytes: Vec<u8>,
}

impl Token {
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::BinaryLiteral
                | TokenKind::OctalLiteral
                | TokenKind::DecimalLiteral
                | TokenKind::HexLiteral
        )
    }

    /// Value of an integer literal in the radix implied by its kind.
    pub fn integer_value(&self) -> Option<u64> {
        let radix = match self.kind {
            TokenKind::BinaryLiteral => 2,
            TokenKind::OctalLiteral => 8,
            TokenKind::DecimalLiteral => 10,
            TokenKind::HexLiteral => 16,
            _ => return None,
        };
        u64::from_str_radix(&self.text, radix).ok()
    }

    pub fn float_value(&self) -> Option<f64> {
        match self.kind {
            TokenKind::FloatLiteral => self.text.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberState {
    Binary,
    Octal,
    Decimal,
    Hex,
}

pub struct Lexer<'src> {
    filename: Arc<str>,
    chars: Chars<'src>,
    current: Option<char>,
    row: u32,
    column: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(filename: impl Into<Arc<str>>, source: &'src str) -> Self {
        let mut lexer = Lexer {
            filename: filename.into(),
            chars: source.chars(),
            current: None,
            row: 1,
            column: 0,
        };
        lexer.current = lexer.read();
        lexer
    }

    pub fn filename(&self) -> &Arc<str> {
        &self.filename
    }

    /// Location of the current unconsumed character.
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.filename.clone(), self.row, self.column)
    }

    fn read(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        match ch {
            '\n' => {
                self.column = 0;
                self.row += 1;
            }
            '\r' => self.column = 0,
            _ => self.column += 1,
        }
        Some(ch)
    }

    fn advance(&mut self) {
        self.current = self.read();
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Produce the next token. Once the input is exhausted every call
    /// returns an `Eof` token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let location = self.location();
        let Some(ch) = self.current else {
            return Ok(Token {
                location,
                kind: TokenKind::Eof,
                text: String::new(),
                bytes: Vec::new(),
            });
        };

        let token = if ch == '0' {
            self.lex_radix(location)
        } else if ch.is_ascii_digit() {
            self.lex_number(location, NumberState::Decimal, String::new())
        } else if ch == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.lex_float(location, String::from("."))
        } else if is_name_start(ch) {
            self.lex_name(location)
        } else if ch == '\'' {
            self.lex_quoted(location, '\'')?
        } else if ch == '"' {
            self.lex_quoted(location, '"')?
        } else if is_operator(ch) {
            self.lex_operator(location)
        } else {
            self.advance();
            Token {
                location,
                kind: TokenKind::Other,
                text: ch.to_string(),
                bytes: Vec::new(),
            }
        };

        trace!(kind = %token.kind, text = %token.text, "token");
        Ok(token)
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current {
            if ch <= ' ' {
                self.advance();
            } else if ch == '#' {
                // `#` closes the comment it opened; an open comment at end of input just ends.
                self.advance();
                while let Some(inner) = self.current {
                    self.advance();
                    if inner == '#' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn lex_radix(&mut self, location: SourceLocation) -> Token {
        self.advance();
        match self.current {
            Some('b' | 'B') => {
                self.advance();
                self.lex_number(location, NumberState::Binary, String::new())
            }
            Some('x' | 'X') => {
                self.advance();
                self.lex_number(location, NumberState::Hex, String::new())
            }
            Some('.') => {
                self.advance();
                self.lex_float(location, String::from("0."))
            }
            Some(c) if c.is_digit(8) => {
                self.lex_number(location, NumberState::Octal, String::new())
            }
            _ => Token {
                location,
                kind: TokenKind::DecimalLiteral,
                text: String::from("0"),
                bytes: Vec::new(),
            },
        }
    }

    fn lex_number(&mut self, location: SourceLocation, state: NumberState, mut text: String) -> Token {
        let radix = match state {
            NumberState::Binary => 2,
            NumberState::Octal => 8,
            NumberState::Decimal => 10,
            NumberState::Hex => 16,
        };
        while let Some(c) = self.current {
            if c.is_digit(radix) {
                text.push(c);
                self.advance();
            } else if c == '.' && state == NumberState::Decimal {
                text.push(c);
                self.advance();
                return self.lex_float(location, text);
            } else {
                break;
            }
        }
        let kind = match state {
            NumberState::Binary => TokenKind::BinaryLiteral,
            NumberState::Octal => TokenKind::OctalLiteral,
            NumberState::Decimal => TokenKind::DecimalLiteral,
            NumberState::Hex => TokenKind::HexLiteral,
        };
        Token {
            location,
            kind,
            text,
            bytes: Vec::new(),
        }
    }

    fn lex_float(&mut self, location: SourceLocation, mut text: String) -> Token {
        while let Some(c) = self.current {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token {
            location,
            kind: TokenKind::FloatLiteral,
            text,
            bytes: Vec::new(),
        }
    }

    fn lex_name(&mut self, location: SourceLocation) -> Token {
        let mut text = String::new();
        while let Some(c) = self.current {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token {
            location,
            kind: TokenKind::Name,
            text,
            bytes: Vec::new(),
        }
    }

    fn lex_operator(&mut self, location: SourceLocation) -> Token {
        let mut text = String::new();
        if let Some(first) = self.current {
            text.push(first);
            self.advance();
        }
        while let Some(c) = self.current {
            if is_compound_operator(c) {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token {
            location,
            kind: TokenKind::Operator,
            text,
            bytes: Vec::new(),
        }
    }

    fn lex_quoted(&mut self, location: SourceLocation, quote: char) -> Result<Token> {
        let (kind, what) = if quote == '\'' {
            (TokenKind::CharLiteral, "character")
        } else {
            (TokenKind::StringLiteral, "string")
        };
        self.advance();
        let mut bytes = Vec::new();
        loop {
            match self.current {
                None => {
                    return Err(Diagnostic::lexical(format!("unterminated {what} literal"))
                        .at(&location));
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    if let Err(diag) = self.lex_escape(&mut bytes) {
                        self.skip_past(quote);
                        return Err(diag.at(&location));
                    }
                }
                Some(c) => {
                    let mut buf = [0; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    self.advance();
                }
            }
        }
        if kind == TokenKind::CharLiteral {
            match bytes.len() {
                0 => return Err(Diagnostic::lexical("empty character literal").at(&location)),
                1 => {}
                _ => {
                    return Err(Diagnostic::lexical(
                        "character literal does not fit in a single byte",
                    )
                    .at(&location));
                }
            }
        }
        Ok(Token {
            location,
            kind,
            text: String::from_utf8_lossy(&bytes).into_owned(),
            bytes,
        })
    }

    /// Drop everything up to and including the next unescaped `quote`.
    fn skip_past(&mut self, quote: char) {
        while let Some(c) = self.current {
            self.advance();
            if c == quote {
                break;
            }
            if c == '\\' {
                self.advance();
            }
        }
    }

    /// Decode the escape whose backslash has just been consumed into `out`.
    /// Numeric escapes always produce a single byte.
    fn lex_escape(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(ch) = self.current else {
            return Err(Diagnostic::lexical("unterminated escape sequence"));
        };
        let simple = match ch {
            'a' => Some(0x07),
            'b' => Some(0x08),
            't' => Some(b'\t'),
            'n' => Some(b'\n'),
            'v' => Some(0x0B),
            'f' => Some(0x0C),
            'r' => Some(b'\r'),
            _ => None,
        };
        if let Some(decoded) = simple {
            self.advance();
            out.push(decoded);
            return Ok(());
        }

        if ch == 'x' {
            self.advance();
            let mut value = 0u8;
            for _ in 0..2 {
                let digit = self
                    .current
                    .and_then(|c| c.to_digit(16))
                    .ok_or_else(|| Diagnostic::lexical("malformed escape: \\x needs two hex digits"))?;
                value = value * 16 + digit as u8;
                self.advance();
            }
            out.push(value);
            return Ok(());
        }

        if ch.is_digit(8) {
            let mut value = 0u32;
            for _ in 0..3 {
                match self.current.and_then(|c| c.to_digit(8)) {
                    Some(digit) => {
                        value = value * 8 + digit;
                        self.advance();
                    }
                    None => break,
                }
            }
            let byte = u8::try_from(value).map_err(|_| {
                Diagnostic::lexical(format!(
                    "malformed escape: octal value {value:o} does not fit in a byte"
                ))
            })?;
            out.push(byte);
            return Ok(());
        }

        self.advance();
        let mut buf = [0; 4];
        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_operator(ch: char) -> bool {
    matches!(
        ch,
        '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '=' | '<' | '>' | '!' | '~'
    )
}

/// Characters that may extend an operator after its first character.
fn is_compound_operator(ch: char) -> bool {
    matches!(ch, '+' | '-' | '&' | '|' | '^' | '=' | '<' | '>')
}

/// Re-escape literal bytes for dumps, the inverse of [`Lexer`] escape
/// decoding. Valid UTF-8 is kept as text; stray bytes become `\xNN`.
pub fn escape_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for ch in chunk.valid().chars() {
            match ch {
                '\x07' => out.push_str("\\a"),
                '\x08' => out.push_str("\\b"),
                '\t' => out.push_str("\\t"),
                '\n' => out.push_str("\\n"),
                '\x0B' => out.push_str("\\v"),
                '\x0C' => out.push_str("\\f"),
                '\r' => out.push_str("\\r"),
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                c if c.is_ascii_control() => {
                    let _ = write!(out, "\\x{:02x}", u32::from(c));
                }
                c => out.push(c),
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
    out
}
