use coppice_base::{value_error, Result};

/// A single CND lexical token. `Eof` is a real variant (not `Option::None`)
/// so the one-token pushback buffer can hold it like any other token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    /// One of `< > = [ ] - + ( ) , * ! /`
    Punct(char),
    QName(String),
    Str(String),
    Eof,
}

/// Recognizes single-char tokens, `'`/`"`-quoted strings with no escapes,
/// QNames matching `[A-Za-z][A-Za-z0-9:_]*`, and `#...` / `//...` comments,
/// with a one-token pushback buffer for the parser's lookahead.
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    pushback: Option<Token>,
}

const PUNCT: &str = "<>=[]-+(),*!";

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            pushback: None,
        }
    }

    pub fn push_back(&mut self, token: Token) {
        debug_assert!(self.pushback.is_none(), "at most one token of pushback");
        self.pushback = Some(token);
    }

    pub fn next_token(&mut self) -> Result<Token> {
        if let Some(token) = self.pushback.take() {
            return Ok(token);
        }
        loop {
            let Some(c) = self.chars.next() else {
                return Ok(Token::Eof);
            };
            match c {
                ' ' | '\t' | '\n' | '\r' => continue,
                '#' => {
                    self.skip_to_eol();
                    continue;
                }
                '/' => {
                    if self.chars.peek() == Some(&'/') {
                        self.chars.next();
                        self.skip_to_eol();
                        continue;
                    }
                    return Ok(Token::Punct('/'));
                }
                c if PUNCT.contains(c) => return Ok(Token::Punct(c)),
                c if c.is_ascii_alphabetic() => return Ok(self.lex_qname(c)),
                '\'' | '"' => return Ok(self.lex_string(c)),
                other => return Err(value_error(format!("unexpected character: {other:?}"))),
            }
        }
    }

    fn skip_to_eol(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    fn lex_qname(&mut self, first: char) -> Token {
        let mut got = String::new();
        got.push(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == ':' || c == '_' {
                got.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::QName(got)
    }

    fn lex_string(&mut self, quote: char) -> Token {
        let mut got = String::new();
        for c in self.chars.by_ref() {
            if c == quote {
                break;
            }
            got.push(c);
        }
        Token::Str(got)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap();
            if t == Token::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn test_punctuation_and_qnames() {
        assert_eq!(
            tokens("[nt:base] > nt:folder"),
            vec![
                Token::Punct('['),
                Token::QName("nt:base".into()),
                Token::Punct(']'),
                Token::Punct('>'),
                Token::QName("nt:folder".into()),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens("'hello world' \"quoted\""),
            vec![Token::Str("hello world".into()), Token::Str("quoted".into())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokens("nt:base # a comment\n// another\nnt:folder"),
            vec![Token::QName("nt:base".into()), Token::QName("nt:folder".into())]
        );
    }

    #[test]
    fn test_lone_slash_is_punct() {
        assert_eq!(tokens("/ a"), vec![Token::Punct('/'), Token::QName("a".into())]);
    }

    #[test]
    fn test_pushback() {
        let mut lexer = Lexer::new("a b");
        let first = lexer.next_token().unwrap();
        lexer.push_back(first.clone());
        assert_eq!(lexer.next_token().unwrap(), first);
        assert_eq!(lexer.next_token().unwrap(), Token::QName("b".into()));
    }
}
