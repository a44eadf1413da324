//! # Parser Module
//!
//! Builds the generic parse tree from the lexer's token stream.
//!
//! ## Grammar
//! ```text
//! element := '(' NAME item* ')'
//! item    := element | ATOM | STRING
//! ```
//! `NAME` must belong to the closed vocabulary of [`NodeKind`]; atoms that
//! read as numbers become `Number` leaves, everything else `Label` leaves.
//!
//! ## Entry Point
//! `parse(source: &str) -> Result<Node, ScoreError>`
//!
//! ## Example
//! ```rust
//! use scorec::{parse, NodeKind};
//!
//! let tree = parse("(score (vers 2.0) (instrument (musicData (n c4 q))))").unwrap();
//! assert_eq!(tree.kind, NodeKind::Score);
//! assert_eq!(tree.children.len(), 2);
//! ```

use crate::error::ScoreError;
use crate::lexer::{Lexer, LocatedToken, Token};
use crate::tree::{Locator, Node, NodeKind};

/// Parser for LDP token streams
pub struct Parser {
    tokens: Vec<LocatedToken>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<LocatedToken>) -> Self {
        Self { tokens, position: 0 }
    }

    fn current(&self) -> Option<&LocatedToken> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<LocatedToken> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn end_position(&self) -> (usize, usize) {
        self.tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1))
    }

    /// Parse exactly one root element; trailing tokens are an error.
    pub fn parse_document(&mut self) -> Result<Node, ScoreError> {
        let root = self.parse_element()?;
        if let Some(extra) = self.current() {
            return Err(ScoreError::ParseError {
                line: extra.line,
                column: extra.column,
                message: "Unexpected content after the root element".to_string(),
            });
        }
        Ok(root)
    }

    fn parse_element(&mut self) -> Result<Node, ScoreError> {
        let open = match self.advance() {
            Some(t) if t.token == Token::LeftParen => t,
            Some(t) => {
                return Err(ScoreError::ParseError {
                    line: t.line,
                    column: t.column,
                    message: "Expected '('".to_string(),
                });
            }
            None => {
                let (line, column) = self.end_position();
                return Err(ScoreError::ParseError {
                    line,
                    column,
                    message: "Unexpected end of input, expected '('".to_string(),
                });
            }
        };
        let locator = Locator {
            line: open.line,
            column: open.column,
        };

        let kind = match self.advance() {
            Some(LocatedToken {
                token: Token::Atom(name),
                line,
                column,
            }) => NodeKind::from_name(&name).ok_or_else(|| ScoreError::ParseError {
                line,
                column,
                message: format!("Unknown element '{}'", name),
            })?,
            Some(t) => {
                return Err(ScoreError::ParseError {
                    line: t.line,
                    column: t.column,
                    message: "Expected element name after '('".to_string(),
                });
            }
            None => {
                return Err(ScoreError::ParseError {
                    line: open.line,
                    column: open.column,
                    message: "Unexpected end of input after '('".to_string(),
                });
            }
        };

        let mut children = Vec::new();
        loop {
            let Some(token) = self.current().cloned() else {
                return Err(ScoreError::ParseError {
                    line: open.line,
                    column: open.column,
                    message: format!("Element '{}' is not closed", kind.name()),
                });
            };
            let child_locator = Locator {
                line: token.line,
                column: token.column,
            };
            match token.token {
                Token::RightParen => {
                    self.advance();
                    break;
                }
                Token::LeftParen => children.push(self.parse_element()?),
                Token::Atom(text) => {
                    self.advance();
                    let atom_kind = if is_number(&text) {
                        NodeKind::Number
                    } else {
                        NodeKind::Label
                    };
                    children.push(Node::atom(atom_kind, text, child_locator));
                }
                Token::Str(text) => {
                    self.advance();
                    children.push(Node::atom(NodeKind::String, text, child_locator));
                }
            }
        }

        Ok(Node::element(kind, children, locator))
    }
}

fn is_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    digits.starts_with(|c: char| c.is_ascii_digit()) && text.parse::<f64>().is_ok()
}

/// Parse LDP source text into a parse tree.
pub fn parse(source: &str) -> Result<Node, ScoreError> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_document()
}
