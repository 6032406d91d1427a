//! Classified tokens
//!
//! A [`Token`] is a literal from the lexer plus the [`TokenKind`] the
//! registry assigned to it.

use serde::Serialize;
use std::fmt;

/// Classification of a literal
///
/// The set is closed for the core language; dialects extend it through
/// [`TokenKind::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // Query keywords
    Select,
    For,
    In,
    Let,
    Where,
    Order,
    By,
    Asc,
    Desc,
    Unique,
    Offset,
    Limit,
    Return,
    As,

    // Boolean keywords
    And,
    Or,
    Not,
    Exists,
    Some,
    Every,
    At,
    Least,
    Most,
    Satisfies,
    Isa,
    Ako,

    // Arithmetic keywords
    Div,
    Mod,

    // Environment clause
    Prefix,
    Pragma,

    /// Axis name following `>>` or `<<`
    AxisName,

    // Navigation symbols
    ForwardStep,
    BackwardStep,
    /// `//` instances shortcut or type filter
    TypeShortcut,
    /// `/` characteristic value shortcut
    ValueShortcut,
    /// `\` backward characteristic value shortcut
    BackwardValueShortcut,

    // Brackets and punctuation
    SquareOpen,
    SquareClose,
    RoundOpen,
    RoundClose,
    CurlyOpen,
    CurlyClose,
    Comma,
    Dot,
    DoubleDot,
    Ellipsis,
    Colon,
    Assign,
    Scope,
    Caret,

    // Comparison operators
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    RegexMatch,

    // Content operators
    Plus,
    Minus,
    Star,
    Union,
    Difference,

    // Literals and references
    Variable,
    /// `$#` position inside a filter
    IndexVariable,
    /// `%_` the queried topic map
    TopicMapVariable,
    /// `?` prepared statement placeholder
    Parameter,
    StringLiteral,
    IntegerLiteral,
    DecimalLiteral,
    BooleanLiteral,
    /// Absolute IRI
    Iri,
    /// `prefix:local`
    QName,

    /// Any literal nothing else claims; item references by relative IRI
    Placeholder,

    /// Kind contributed by a dialect
    Custom(&'static str),
}

impl TokenKind {
    /// True for the keywords that open or separate FLWR clauses
    pub fn is_clause_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::For
                | TokenKind::Let
                | TokenKind::Where
                | TokenKind::Order
                | TokenKind::Unique
                | TokenKind::Offset
                | TokenKind::Limit
                | TokenKind::Return
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            TokenKind::Equals
                | TokenKind::NotEquals
                | TokenKind::Less
                | TokenKind::LessEquals
                | TokenKind::Greater
                | TokenKind::GreaterEquals
                | TokenKind::RegexMatch
        )
    }

    pub fn is_opening_bracket(self) -> bool {
        matches!(
            self,
            TokenKind::SquareOpen | TokenKind::RoundOpen | TokenKind::CurlyOpen
        )
    }

    pub fn is_closing_bracket(self) -> bool {
        matches!(
            self,
            TokenKind::SquareClose | TokenKind::RoundClose | TokenKind::CurlyClose
        )
    }

    /// Tokens that may stand alone as an item reference
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            TokenKind::Placeholder | TokenKind::QName | TokenKind::Iri
        )
    }

    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::StringLiteral
                | TokenKind::IntegerLiteral
                | TokenKind::DecimalLiteral
                | TokenKind::BooleanLiteral
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Custom(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A classified literal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,

    /// Canonical literal; string literals hold their unescaped content
    pub literal: String,

    /// Byte offset in the query text
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            literal: literal.into(),
            position,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == TokenKind::StringLiteral {
            write!(f, "\"{}\"", self.literal.replace('"', "\\\""))
        } else {
            f.write_str(&self.literal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups() {
        assert!(TokenKind::Where.is_clause_keyword());
        assert!(!TokenKind::And.is_clause_keyword());
        assert!(TokenKind::RegexMatch.is_comparison());
        assert!(TokenKind::CurlyOpen.is_opening_bracket());
        assert!(TokenKind::QName.is_reference());
        assert!(TokenKind::BooleanLiteral.is_literal());
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::Custom("DELETE").to_string(), "DELETE");
        assert_eq!(TokenKind::ForwardStep.to_string(), "ForwardStep");
        let token = Token::new(TokenKind::StringLiteral, "say \"hi\"", 0);
        assert_eq!(token.to_string(), "\"say \\\"hi\\\"\"");
    }
}
