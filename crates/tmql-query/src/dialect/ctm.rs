//! Reader for the CTM subset accepted by INSERT
//!
//! ```text
//! fragment    := topic | association
//! topic       := reference ( item ( ';' item )* )? '.'
//! item        := 'isa' reference | '-' string | reference ':' string
//! association := reference '(' role ( ',' role )* ')' '.'?
//! role        := reference ':' reference
//! reference   := iri | word | qname | '=' locator | '^' locator
//! ```
//!
//! Plain references are subject identifiers, `=` marks a subject locator and
//! `^` an item identifier. Words resolve against the base locator, QNames
//! against the prefixes of the query's environment clause.

use crate::ast::Environment;
use logos::Logos;
use tmql_core::{Error, Result};
use tmql_graph::{Fragment, TopicReference};

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
enum Ctm {
    // Absolute IRIs never end with the '.' closing a topic block
    #[regex(r#"[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s;,()"]*[^\s;,()".]"#)]
    Iri,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_\-]*(:[a-zA-Z_][a-zA-Z0-9_\-]*)?")]
    Word,

    #[regex(r#""([^"\\]|\\.)*""#)]
    Text,

    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("(")]
    Open,
    #[token(")")]
    Close,
    #[token("=")]
    Equals,
    #[token("^")]
    Caret,
    #[token("-")]
    Dash,
}

struct Lexeme<'t> {
    kind: Ctm,
    slice: &'t str,
    position: usize,
}

/// Read every fragment of a CTM text
pub fn read_fragments(
    text: &str,
    base_locator: &str,
    environment: &Environment,
) -> Result<Vec<Fragment>> {
    let mut lexer = Ctm::lexer(text);
    let mut lexemes = Vec::new();
    while let Some(kind) = lexer.next() {
        let kind = kind.map_err(|()| invalid(lexer.span().start, "illegal character"))?;
        lexemes.push(Lexeme {
            kind,
            slice: lexer.slice(),
            position: lexer.span().start,
        });
    }

    let mut reader = Reader {
        lexemes,
        at: 0,
        end: text.len(),
        base_locator,
        environment,
    };
    let mut fragments = Vec::new();
    while reader.at < reader.lexemes.len() {
        fragments.push(reader.fragment()?);
    }
    Ok(fragments)
}

fn invalid(position: usize, message: impl AsRef<str>) -> Error {
    Error::RuntimeEvaluation(format!(
        "Invalid INSERT content at position {}: {}",
        position,
        message.as_ref()
    ))
}

struct Reader<'t> {
    lexemes: Vec<Lexeme<'t>>,
    at: usize,
    end: usize,
    base_locator: &'t str,
    environment: &'t Environment,
}

impl<'t> Reader<'t> {
    fn peek(&self) -> Option<Ctm> {
        self.lexemes.get(self.at).map(|l| l.kind)
    }

    fn position(&self) -> usize {
        self.lexemes.get(self.at).map(|l| l.position).unwrap_or(self.end)
    }

    /// Kind and text of the next lexeme
    fn next(&mut self, expected: &str) -> Result<(Ctm, &'t str)> {
        let position = self.position();
        let lexeme = self
            .lexemes
            .get(self.at)
            .ok_or_else(|| invalid(position, format!("expected {}", expected)))?;
        let next = (lexeme.kind, lexeme.slice);
        self.at += 1;
        Ok(next)
    }

    fn expect(&mut self, kind: Ctm, expected: &str) -> Result<()> {
        let position = self.position();
        if self.next(expected)?.0 != kind {
            return Err(invalid(position, format!("expected {}", expected)));
        }
        Ok(())
    }

    fn fragment(&mut self) -> Result<Fragment> {
        let head = self.reference()?;
        if self.peek() == Some(Ctm::Open) {
            self.association(head)
        } else {
            self.topic(head)
        }
    }

    fn topic(&mut self, identity: TopicReference) -> Result<Fragment> {
        let mut types = Vec::new();
        let mut names = Vec::new();
        let mut occurrences = Vec::new();
        loop {
            let position = self.position();
            let (kind, slice) = self.next("'.' closing the topic block")?;
            match kind {
                Ctm::Dot => break,
                Ctm::Semicolon => {}
                Ctm::Word if slice == "isa" => types.push(self.reference()?),
                Ctm::Dash => names.push(self.text()?),
                Ctm::Iri | Ctm::Word | Ctm::Equals | Ctm::Caret => {
                    self.at -= 1;
                    let occurrence_type = self.reference()?;
                    self.expect(Ctm::Colon, "':' after the occurrence type")?;
                    occurrences.push((occurrence_type, self.text()?));
                }
                _ => return Err(invalid(position, "unexpected symbol in topic block")),
            }
        }
        Ok(Fragment::Topic {
            identity,
            types,
            names,
            occurrences,
        })
    }

    fn association(&mut self, association_type: TopicReference) -> Result<Fragment> {
        self.expect(Ctm::Open, "'('")?;
        let mut roles = Vec::new();
        loop {
            let role_type = self.reference()?;
            self.expect(Ctm::Colon, "':' after the role type")?;
            let player = self.reference()?;
            roles.push((role_type, player));

            let position = self.position();
            match self.next("',' or ')'")?.0 {
                Ctm::Comma => {}
                Ctm::Close => break,
                _ => return Err(invalid(position, "expected ',' or ')'")),
            }
        }
        if self.peek() == Some(Ctm::Dot) {
            self.at += 1;
        }
        Ok(Fragment::Association {
            association_type,
            roles,
        })
    }

    fn reference(&mut self) -> Result<TopicReference> {
        let position = self.position();
        let (kind, _) = self.next("a topic reference")?;
        match kind {
            Ctm::Equals => Ok(TopicReference::SubjectLocator(self.locator()?)),
            Ctm::Caret => Ok(TopicReference::ItemIdentifier(self.locator()?)),
            Ctm::Iri | Ctm::Word => {
                self.at -= 1;
                Ok(TopicReference::SubjectIdentifier(self.locator()?))
            }
            _ => Err(invalid(position, "expected a topic reference")),
        }
    }

    /// Absolute IRI of an IRI, QName or relative word
    fn locator(&mut self) -> Result<String> {
        let position = self.position();
        let (kind, slice) = self.next("an IRI")?;
        match kind {
            Ctm::Iri => Ok(slice.to_string()),
            Ctm::Word if slice.contains(':') => self
                .environment
                .expand(slice)
                .ok_or_else(|| invalid(position, format!("unknown prefix in '{}'", slice))),
            Ctm::Word => Ok(format!("{}{}", self.base_locator, slice)),
            _ => Err(invalid(position, "expected an IRI")),
        }
    }

    fn text(&mut self) -> Result<String> {
        let position = self.position();
        let (kind, slice) = self.next("a string")?;
        if kind != Ctm::Text {
            return Err(invalid(position, "expected a string"));
        }
        let body = &slice[1..slice.len() - 1];
        Ok(body.replace("\\\"", "\"").replace("\\\\", "\\"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://example.org/";

    fn read(text: &str) -> Result<Vec<Fragment>> {
        read_fragments(text, BASE, &Environment::default())
    }

    fn si(iri: &str) -> TopicReference {
        TopicReference::SubjectIdentifier(iri.to_string())
    }

    #[test]
    fn test_topic_by_absolute_iri() {
        let fragments = read("http://psi.example.org/topic.").unwrap();
        assert_eq!(
            fragments,
            vec![Fragment::Topic {
                identity: si("http://psi.example.org/topic"),
                types: Vec::new(),
                names: Vec::new(),
                occurrences: Vec::new(),
            }]
        );
    }

    #[test]
    fn test_topic_block_items() {
        let fragments = read(r#"alice isa person ; - "Alice" ; age : "42" ."#).unwrap();
        assert_eq!(
            fragments,
            vec![Fragment::Topic {
                identity: si("http://example.org/alice"),
                types: vec![si("http://example.org/person")],
                names: vec!["Alice".to_string()],
                occurrences: vec![(si("http://example.org/age"), "42".to_string())],
            }]
        );
    }

    #[test]
    fn test_identities() {
        let fragments = read("= http://example.org/page . ^ local .").unwrap();
        let identities: Vec<&TopicReference> = fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Topic { identity, .. } => Some(identity),
                _ => None,
            })
            .collect();
        assert_eq!(
            identities,
            vec![
                &TopicReference::SubjectLocator("http://example.org/page".to_string()),
                &TopicReference::ItemIdentifier("http://example.org/local".to_string()),
            ]
        );
    }

    #[test]
    fn test_association_and_qnames() {
        let environment = Environment {
            prefixes: vec![("ex".to_string(), "http://ex.org/".to_string())],
            pragmas: Vec::new(),
        };
        let fragments =
            read_fragments("ex:knows ( ex:person : alice , ex:person : bob )", BASE, &environment)
                .unwrap();
        assert_eq!(
            fragments,
            vec![Fragment::Association {
                association_type: si("http://ex.org/knows"),
                roles: vec![
                    (si("http://ex.org/person"), si("http://example.org/alice")),
                    (si("http://ex.org/person"), si("http://example.org/bob")),
                ],
            }]
        );
    }

    #[test]
    fn test_malformed_content() {
        for text in ["alice", "alice - 42 .", "knows ( person alice )", "nope:x .", "alice ! ."] {
            assert!(
                matches!(read(text), Err(Error::RuntimeEvaluation(_))),
                "{text}"
            );
        }
        assert!(read("").unwrap().is_empty());
    }
}
