use logos::Logos;
use std::fmt;
use thiserror::Error;

use crate::source::Span;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")] // Skip whitespace
#[logos(skip r";[^\n\r]*")] // Skip comments
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(".")]
    Dot,
    #[token("'")]
    Quote,
    #[token("`")]
    QuasiQuote,
    #[token(",")]
    Unquote,
    #[token(",@")]
    UnquoteSplicing,
    #[regex(
        r"[\p{Extended_Pictographic}.a-zA-Z0-9!#$%&*/:<=>?~_^+-]+",
        |lex| lex.slice().to_string(),
        priority = 1
    )]
    Symbol(String),
    #[regex(
        r"[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][-+]?[0-9]+)?",
        |lex| {
            let slice = lex.slice();
            slice
                .parse::<f64>()
                .map_err(|_| LexerErrorKind::InvalidNumberFormat(slice.to_string()))
        },
        priority = 3
    )]
    Number(f64),
    #[token("#t", |_| true)]
    #[token("#f", |_| false)]
    Boolean(bool),
    #[regex(r#""([^"\\]|\\.)*.?"#, |lex| {
        let slice = lex.slice();
        let len = slice.len();
        // make sure string was terminated
        if len == 1 || &slice[len - 1..] != "\"" {
            return Err(LexerErrorKind::UnterminatedString);
        }
        unescape::unescape(&slice[1..len - 1])
    })]
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

mod unescape {
    use super::{LexerErrorKind, LexerResult};

    pub fn unescape(s: &str) -> LexerResult<String> {
        // un-escaping should only ever reduce the length of the string.
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => result.push('\n'),
                    Some('r') => result.push('\r'),
                    Some('t') => result.push('\t'),
                    Some('\\') => result.push('\\'),
                    Some('"') => result.push('"'),
                    Some(c) => return Err(LexerErrorKind::UnknownEscapeSequence(c)),
                    None => return Err(LexerErrorKind::UnterminatedString),
                }
            } else {
                result.push(c);
            }
        }
        Ok(result)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::QuasiQuote => write!(f, "`"),
            TokenKind::Unquote => write!(f, ","),
            TokenKind::UnquoteSplicing => write!(f, ",@"),
            TokenKind::Symbol(s) => write!(f, "{}", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            TokenKind::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Invalid number format: '{0}'")]
    InvalidNumberFormat(String),
    #[error("Unknown escape sequence: '\\{0}'")]
    UnknownEscapeSequence(char),
    #[default]
    #[error("Invalid token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
}

type LexerResult<T> = Result<T, LexerErrorKind>;

/// Tokenizes the whole input, stopping at the first invalid token.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexerError> {
    TokenKind::lexer(input)
        .spanned()
        .map(|(result, range)| {
            let span = Span::new(range.start, range.end);
            match result {
                Ok(kind) => Ok(Token { kind, span }),
                Err(error) => Err(LexerError { error, span }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tokens(input: &str, expected: Vec<TokenKind>) {
        match tokenize(input) {
            Ok(tokens) => {
                let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
                assert_eq!(kinds, expected, "Input: '{}'", input);
            }
            Err(e) => panic!("Lexing failed for input '{}': {}", input, e.error),
        }
    }

    fn assert_lexer_error(input: &str, expected_error_variant: LexerErrorKind) {
        match tokenize(input) {
            Ok(tokens) => panic!(
                "Expected lexing to fail for input '{}', but got tokens: {:?}",
                input, tokens
            ),
            Err(e) => {
                assert_eq!(
                    std::mem::discriminant(&e.error),
                    std::mem::discriminant(&expected_error_variant),
                    "Input: '{}', Expected error variant like {:?}, got: {:?}",
                    input,
                    expected_error_variant,
                    e
                );
            }
        }
    }

    fn sym(s: &str) -> TokenKind {
        TokenKind::Symbol(s.to_string())
    }

    #[test]
    fn test_empty_input() {
        assert_tokens("", vec![]);
        assert_tokens("   ; just a comment", vec![]);
    }

    #[test]
    fn test_parentheses_and_quotes() {
        assert_tokens("()", vec![TokenKind::LParen, TokenKind::RParen]);
        assert_tokens(
            "`(,@(1 2) ,x)",
            vec![
                TokenKind::QuasiQuote,
                TokenKind::LParen,
                TokenKind::UnquoteSplicing,
                TokenKind::LParen,
                TokenKind::Number(1.0),
                TokenKind::Number(2.0),
                TokenKind::RParen,
                TokenKind::Unquote,
                sym("x"),
                TokenKind::RParen,
            ],
        );
    }

    #[test]
    fn test_numbers() {
        assert_tokens("123", vec![TokenKind::Number(123.0)]);
        assert_tokens("-45", vec![TokenKind::Number(-45.0)]);
        assert_tokens("6.78", vec![TokenKind::Number(6.78)]);
        assert_tokens(".5", vec![TokenKind::Number(0.5)]);
        assert_tokens("-1e-5", vec![TokenKind::Number(-1e-5)]);
    }

    #[test]
    fn test_symbols_and_booleans() {
        assert_tokens("#t #f", vec![TokenKind::Boolean(true), TokenKind::Boolean(false)]);
        assert_tokens("+", vec![sym("+")]);
        assert_tokens("-", vec![sym("-")]);
        assert_tokens("<=?", vec![sym("<=?")]);
        assert_tokens("...", vec![sym("...")]);
        assert_tokens("#!optional", vec![sym("#!optional")]);
        assert_tokens("set-car!", vec![sym("set-car!")]);
    }

    #[test]
    fn test_dotted_pair() {
        assert_tokens(
            "(a . b)",
            vec![
                TokenKind::LParen,
                sym("a"),
                TokenKind::Dot,
                sym("b"),
                TokenKind::RParen,
            ],
        );
    }

    #[test]
    fn test_strings() {
        assert_tokens(r#""hello""#, vec![TokenKind::String("hello".to_string())]);
        assert_tokens(
            r#""a\"b\n""#,
            vec![TokenKind::String("a\"b\n".to_string())],
        );
        assert_lexer_error(r#""abc"#, LexerErrorKind::UnterminatedString);
        assert_lexer_error(r#""a\qb""#, LexerErrorKind::UnknownEscapeSequence('q'));
    }

    #[test]
    fn test_spans() {
        let tokens = tokenize("(+ 1)").unwrap();
        assert_eq!(tokens[1].span, Span::new(1, 2));
        assert_eq!(tokens[2].span, Span::new(3, 4));
    }
}
