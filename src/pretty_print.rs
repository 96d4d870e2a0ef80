use crate::environment::EnvError;
use crate::evaluator::EvalError;
use crate::parser::ParseError;
use ariadne::{Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

type SourceSpan<'a> = (&'a str, Range<usize>);

impl ParseError {
    fn report<'a>(&self, name: &'a str, input: &str) -> Report<'a, SourceSpan<'a>> {
        match self {
            ParseError::UnexpectedToken { found, expected } => {
                Report::build(ReportKind::Error, (name, found.span.to_range()))
                    .with_message(format!("Unexpected token: {}", found.kind))
                    .with_label(
                        Label::new((name, found.span.to_range()))
                            .with_message(format!("Expected {}", expected)),
                    )
                    .finish()
            }
            ParseError::UnexpectedEof(expected) => {
                let idx = input.len();
                Report::build(ReportKind::Error, (name, idx..idx))
                    .with_message("Unexpected EOF")
                    .with_label(
                        Label::new((name, idx..idx)).with_message(format!("Expected {}", expected)),
                    )
                    .finish()
            }
            ParseError::LexerError(lex_err) => {
                Report::build(ReportKind::Error, (name, lex_err.span.to_range()))
                    .with_message("Lexer Error")
                    .with_label(
                        Label::new((name, lex_err.span.to_range()))
                            .with_message(lex_err.error.to_string()),
                    )
                    .finish()
            }
            ParseError::InvalidDotSyntax(span) => {
                Report::build(ReportKind::Error, (name, span.to_range()))
                    .with_message("Invalid Dot Syntax")
                    .with_label(Label::new((name, span.to_range())).with_message("Unexpected dot"))
                    .finish()
            }
        }
    }

    /// Writes a labelled report of this error against `input` to stderr.
    pub fn pretty_print(&self, name: &str, input: &str) -> io::Result<()> {
        self.report(name, input).eprint((name, Source::from(input)))
    }
}

impl EvalError {
    /// Values carry no source positions, so the report points at the whole
    /// top-level form that failed.
    pub fn pretty_print(&self, name: &str, input: &str) -> io::Result<()> {
        let start = input.len() - input.trim_start().len();
        let end = input.trim_end().len().max(start);
        let label = match self {
            EvalError::Env(EnvError::UnboundVariable(_)) => {
                "This symbol is not defined in the current scope"
            }
            EvalError::Env(EnvError::ArityMismatch { .. }) => "Wrong number of arguments in this call",
            EvalError::Malformed(_) => "This expression is not a well-formed list",
            EvalError::NotCallable(_) => "This expression cannot be called as a procedure",
            EvalError::Arity { .. } => "Wrong number of arguments in this call",
            EvalError::InvalidSpecialForm(_) => "This special form is malformed or incomplete",
            EvalError::TypeMismatch { .. } => "An argument has the wrong type",
            EvalError::DivisionByZero => "Division by zero",
            EvalError::User(_) => "Raised while evaluating this form",
        };
        Report::build(ReportKind::Error, (name, start..end))
            .with_message(self.to_string())
            .with_label(Label::new((name, start..end)).with_message(label))
            .finish()
            .eprint((name, Source::from(input)))
    }
}
