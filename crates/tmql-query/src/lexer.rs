//! TMQL lexer using logos
//!
//! The lexer only splits query text into literals with their byte
//! positions. Deciding what a literal *is* (keyword, axis name, item
//! reference, ...) is the job of the token registry, so dialects can claim
//! words the core language does not know.

use logos::Logos;
use tmql_core::{Error, Result};

/// Raw lexical classes recognised by the scanner
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Raw {
    // Comments run to the end of the line
    #[regex(r"#[^\n]*", logos::skip)]
    Comment,

    // Strings
    #[regex(r#""([^"\\]|\\.)*""#)]
    DoubleQuoted,

    #[regex(r#"'([^'\\]|\\.)*'"#)]
    SingleQuoted,

    #[regex(r"'''([^']|'[^']|''[^'])*'''")]
    TripleSingleQuoted,

    #[regex(r#""""([^"]|"[^"]|""[^"])*""""#)]
    TripleDoubleQuoted,

    // Numbers are unsigned; a leading '-' is its own symbol
    #[regex(r"[0-9]+")]
    Integer,

    #[regex(r"[0-9]+\.[0-9]+")]
    Decimal,

    // Absolute IRIs
    #[regex(r#"[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s\[\]\(\)\{\},"'<>]*"#)]
    Iri,

    // Words, QNames and function names
    #[regex(r"[a-zA-Z_]([a-zA-Z0-9_]|-[a-zA-Z0-9_])*(:[a-zA-Z_]([a-zA-Z0-9_]|-[a-zA-Z0-9_])*)?")]
    Word,

    // Variables
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*'*")]
    #[token("$#")]
    Dollar,

    #[regex(r"%[a-zA-Z_][a-zA-Z0-9_]*")]
    Percent,

    // Operators and punctuation
    #[token(">>")]
    #[token("<<")]
    #[token("//")]
    #[token("/")]
    #[token("\\")]
    #[token("[")]
    #[token("]")]
    #[token("(")]
    #[token(")")]
    #[token("{")]
    #[token("}")]
    #[token(",")]
    #[token(".")]
    #[token("..")]
    #[token("...")]
    #[token("==")]
    #[token("=")]
    #[token("!=")]
    #[token("<")]
    #[token("<=")]
    #[token(">")]
    #[token(">=")]
    #[token("=~")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token(":")]
    #[token(":=")]
    #[token("@")]
    #[token("^")]
    #[token("?")]
    #[token("++")]
    #[token("--")]
    Symbol,
}

/// A literal cut from the query text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    /// Literal text; for string literals the unescaped content
    pub literal: String,

    /// Byte offset of the literal in the query text
    pub position: usize,

    /// True if the literal was a quoted string
    pub quoted: bool,
}

impl Lexeme {
    fn new(literal: impl Into<String>, position: usize, quoted: bool) -> Self {
        Self {
            literal: literal.into(),
            position,
            quoted,
        }
    }
}

/// Split query text into literals
pub fn tokenize(input: &str) -> Result<Vec<Lexeme>> {
    let mut lexer = Raw::lexer(input);
    let mut lexemes = Vec::new();

    while let Some(raw) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        match raw {
            Ok(Raw::DoubleQuoted) | Ok(Raw::SingleQuoted) => {
                let body = &slice[1..slice.len() - 1];
                lexemes.push(Lexeme::new(unescape(body), span.start, true));
            }
            Ok(Raw::TripleSingleQuoted) | Ok(Raw::TripleDoubleQuoted) => {
                let body = &slice[3..slice.len() - 3];
                lexemes.push(Lexeme::new(body, span.start, true));
            }
            Ok(_) => lexemes.push(Lexeme::new(slice, span.start, false)),
            Err(()) => {
                let message = if slice.starts_with('"') || slice.starts_with('\'') {
                    "unterminated string literal".to_string()
                } else {
                    format!("illegal character '{}'", slice)
                };
                return Err(Error::Lexical {
                    position: span.start,
                    message,
                });
            }
        }
    }

    Ok(lexemes)
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
