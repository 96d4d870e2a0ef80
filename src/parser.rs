use crate::lexer::{LexerError, Token, TokenKind};
use crate::source::Span;
use crate::types::Value;
use std::iter::Peekable;
use std::vec::IntoIter;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Parse Error [at {}]: Unexpected token '{}', expected {expected}", .found.span, .found.kind)]
    UnexpectedToken { found: Token, expected: String },
    #[error("Parse Error: Unexpected end of input during parsing. Expected {0}")]
    UnexpectedEof(String),
    #[error("Lexer Error during parse: {0}")]
    LexerError(#[from] LexerError),
    #[error("Parse Error: Invalid syntax for dotted pair at [{0}]")]
    InvalidDotSyntax(Span),
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens.into_iter().peekable(),
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    pub fn at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    /// Parses a single S-expression from the token stream.
    pub fn parse_expr(&mut self) -> ParseResult<Value> {
        let token = self.next_token();
        self.parse_expr_with_token(token)
    }

    fn parse_expr_with_token(&mut self, token: Option<Token>) -> ParseResult<Value> {
        let Some(token) = token else {
            return Err(ParseError::UnexpectedEof("an expression".to_string()));
        };
        match token.kind {
            TokenKind::LParen => self.parse_list(token.span),
            TokenKind::Quote => self.parse_quoted_expr("quote"),
            TokenKind::QuasiQuote => self.parse_quoted_expr("quasiquote"),
            TokenKind::Unquote => self.parse_quoted_expr("unquote"),
            TokenKind::UnquoteSplicing => self.parse_quoted_expr("unquote-splicing"),
            TokenKind::Symbol(s) => Ok(Value::symbol(&s)),
            TokenKind::Number(n) => Ok(Value::Number(n)),
            TokenKind::Boolean(b) => Ok(Value::Boolean(b)),
            TokenKind::String(s) => Ok(Value::string(&s)),
            TokenKind::Dot => Err(ParseError::InvalidDotSyntax(token.span)),
            TokenKind::RParen => Err(ParseError::UnexpectedToken {
                found: token,
                expected: "an expression".to_string(),
            }),
        }
    }

    /// Parses the remainder of a list after its opening parenthesis.
    fn parse_list(&mut self, open: Span) -> ParseResult<Value> {
        let mut items = Vec::new();
        loop {
            match self.next_token() {
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => return Ok(Value::list(items)),
                Some(Token {
                    kind: TokenKind::Dot,
                    span,
                }) => {
                    if items.is_empty() {
                        return Err(ParseError::InvalidDotSyntax(span));
                    }
                    let tail = self.parse_expr()?;
                    return match self.next_token() {
                        Some(Token {
                            kind: TokenKind::RParen,
                            ..
                        }) => Ok(Value::list_with_tail(items, tail)),
                        Some(found) => Err(ParseError::UnexpectedToken {
                            found,
                            expected: "')' after dotted pair".to_string(),
                        }),
                        None => Err(ParseError::UnexpectedEof(
                            "')' after dotted pair".to_string(),
                        )),
                    };
                }
                Some(token) => items.push(self.parse_expr_with_token(Some(token))?),
                None => {
                    return Err(ParseError::UnexpectedEof(format!(
                        "')' to close '(' at {}",
                        open
                    )));
                }
            }
        }
    }

    /// Parses `'expr` into `(quote expr)` and likewise for the other prefixes.
    fn parse_quoted_expr(&mut self, quote_symbol: &str) -> ParseResult<Value> {
        let quoted_expr = self.parse_expr()?;
        Ok(Value::list(vec![Value::symbol(quote_symbol), quoted_expr]))
    }

    /// Parses exactly one top-level expression.
    pub fn parse(mut self) -> ParseResult<Value> {
        let expr = self.parse_expr()?;
        if let Some(found) = self.next_token() {
            Err(ParseError::UnexpectedToken {
                found,
                expected: "end of input".to_string(),
            })
        } else {
            Ok(expr)
        }
    }

    /// Parses every top-level expression until the tokens run out.
    pub fn parse_all(mut self) -> ParseResult<Vec<Value>> {
        let mut expressions = Vec::new();
        while !self.at_end() {
            expressions.push(self.parse_expr()?);
        }
        Ok(expressions)
    }
}

// Helper function to lex and parse a single expression (useful for tests and REPL)
pub fn parse_str(input: &str) -> ParseResult<Value> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).parse()
}

/// Lexes and parses a whole program: zero or more top-level expressions.
pub fn parse_program(input: &str) -> ParseResult<Vec<Value>> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).parse_all()
}
