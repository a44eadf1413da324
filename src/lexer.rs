use crate::error::ScoreError;

/// Token types for LDP source
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LeftParen,          // (
    RightParen,         // )
    Atom(String),       // c4, q., +, startRepetition, 2, 1.6
    Str(String),        // "quoted text"
}

/// A token with its position in the source
#[derive(Debug, Clone)]
pub struct LocatedToken {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// Lexer for tokenizing LDP source text
pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            position: 0,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn check_comment(&self) -> bool {
        let remaining = &self.input[self.position..];
        remaining.starts_with("//")
    }

    fn is_atom_char(c: char) -> bool {
        !c.is_whitespace() && c != '(' && c != ')' && c != '"'
    }

    pub fn tokenize(&mut self) -> Result<Vec<LocatedToken>, ScoreError> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            let line = self.line;
            let column = self.column;

            // Comments run to the end of the line
            if self.check_comment() {
                while let Some(&c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            let token = match c {
                '(' => {
                    self.advance();
                    Token::LeftParen
                }
                ')' => {
                    self.advance();
                    Token::RightParen
                }
                '"' => {
                    self.advance();
                    let mut text = String::new();
                    loop {
                        match self.advance() {
                            Some('"') => break,
                            Some('\\') => match self.advance() {
                                Some(escaped) => text.push(escaped),
                                None => break,
                            },
                            Some(ch) => text.push(ch),
                            None => {
                                return Err(ScoreError::ParseError {
                                    line,
                                    column,
                                    message: "Unterminated string literal".to_string(),
                                });
                            }
                        }
                    }
                    Token::Str(text)
                }
                c if c.is_whitespace() => {
                    self.advance();
                    continue;
                }
                _ => {
                    let mut text = String::new();
                    while let Some(&c) = self.peek() {
                        if !Self::is_atom_char(c) {
                            break;
                        }
                        text.push(c);
                        self.advance();
                    }
                    Token::Atom(text)
                }
            };

            tokens.push(LocatedToken {
                token,
                line,
                column,
            });
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_element() {
        let mut lexer = Lexer::new("(n c4 q)");
        let tokens = lexer.tokenize().unwrap();
        let token_types: Vec<_> = tokens.iter().map(|t| &t.token).collect();
        assert_eq!(
            token_types,
            vec![
                &Token::LeftParen,
                &Token::Atom("n".to_string()),
                &Token::Atom("c4".to_string()),
                &Token::Atom("q".to_string()),
                &Token::RightParen,
            ]
        );
    }

    #[test]
    fn test_atoms_with_signs_and_dots() {
        let mut lexer = Lexer::new("(n +c4 q. g+ l)(t - )");
        let tokens = lexer.tokenize().unwrap();
        let atoms: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.token {
                Token::Atom(a) => Some(a.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(atoms, vec!["n", "+c4", "q.", "g+", "l", "t", "-"]);
    }

    #[test]
    fn test_positions() {
        let mut lexer = Lexer::new("(score\n  (vers 2.0))");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        // "(vers" on the second line
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
        assert_eq!(tokens[4].token, Token::Atom("2.0".to_string()));
    }

    #[test]
    fn test_comment_skipped() {
        let mut lexer = Lexer::new("(n c4 q) // a comment (with parens)\n(r q)");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens.len(), 9);
        assert_eq!(tokens[4].line, 1);
        assert_eq!(tokens[5].line, 2);
    }

    #[test]
    fn test_string_literal() {
        let mut lexer = Lexer::new(r#"(name "Flute \"solo\"")"#);
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[2].token, Token::Str("Flute \"solo\"".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("(name \"Flute");
        let result = lexer.tokenize();
        match result {
            Err(ScoreError::ParseError { line, column, message }) => {
                assert_eq!((line, column), (1, 7));
                assert!(message.contains("Unterminated"));
            }
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }
}
